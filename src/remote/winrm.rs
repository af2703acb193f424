//! WinRM adapter speaking WS-Management SOAP over HTTP.
//!
//! One remote shell is created per session and reused for every command.
//! Output is pulled with Receive requests until the command reports the Done
//! state; each decoded stream chunk goes straight to the output handler.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info, warn};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::Protocol;
use crate::remote::runner::RunOptions;
use crate::remote::session::{Connector, RemoteSession, RemoteStat, Target};
use crate::remote::stream::OutputHandler;

const NS_ENVELOPE: &str = concat!(
    r#"xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
    r#"xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" "#,
    r#"xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" "#,
    r#"xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell""#
);

const RESOURCE_CMD: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

/// WS-Management fault code for an expired OperationTimeout
const FAULT_OPERATION_TIMEOUT: &str = "2150858793";

/// Server-side wait per Receive request
const RECEIVE_TIMEOUT_SECS: u64 = 20;

/// Raw bytes per write_file round trip; keeps the encoded command under the cmd.exe limit.
const WRITE_CHUNK_SIZE: usize = 1500;

/// Exit status used by the read_file script for a missing file
const MISSING_FILE_STATUS: i32 = 3;

const PROBE_COMMAND: &str = r#"systeminfo | findstr /B /C:"OS Name" /C:"OS Version""#;

static SHELL_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:Name="ShellId"|ShellId)>([^<]+)<"#).expect("valid regex")
});
static COMMAND_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:\w+:)?CommandId>([^<]+)<").expect("valid regex"));
static STREAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:\w+:)?Stream\b([^>]*?)(?:/>|>([^<]*)</(?:\w+:)?Stream>)"#)
        .expect("valid regex")
});
static STREAM_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Name="(\w+)""#).expect("valid regex"));
static STATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<(?:\w+:)?CommandState\b[^>]*State="([^"]+)""#).expect("valid regex"));
static EXIT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:\w+:)?ExitCode>(-?\d+)<").expect("valid regex"));
static FAULT_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:\w+:)?(?:Text|Message)\b[^>]*>([^<]+)<").expect("valid regex")
});

pub struct WinRmConnector {
    timeout: Duration,
}

impl WinRmConnector {
    /// `timeout` bounds each HTTP request, and must exceed the Receive wait.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: timeout.max(Duration::from_secs(RECEIVE_TIMEOUT_SECS + 5)),
        }
    }
}

impl Connector for WinRmConnector {
    fn connect_once(&self, target: &Target) -> Result<Box<dyn RemoteSession>> {
        debug!("Attempting WinRM connection to {}:{}", target.host, target.port);
        let mut session = WinRmSession::open(target, self.timeout)?;

        let mut probe = Capture::default();
        if let Err(e) = session.run(PROBE_COMMAND, &mut probe) {
            // Release the shell opened by this attempt.
            if let Err(close_err) = session.close() {
                debug!("Failed to close WinRM shell after probe error: {}", close_err);
            }
            return Err(e);
        }
        info!("Connected system info:");
        for line in String::from_utf8_lossy(&probe.stdout).lines() {
            if !line.trim().is_empty() {
                info!("  {}", line.trim_end());
            }
        }
        Ok(Box::new(session))
    }
}

/// Response of a SOAP round trip.
enum Reply {
    Body(String),
    /// The server-side OperationTimeout expired; only meaningful for Receive.
    TimedOut,
}

pub struct WinRmSession {
    agent: ureq::Agent,
    endpoint: String,
    authorization: String,
    host: String,
    username: String,
    shell_id: Option<String>,
}

impl WinRmSession {
    fn open(target: &Target, timeout: Duration) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(target.timeout)
            .timeout(timeout)
            .build();
        let credentials = format!("{}:{}", target.username, target.password);
        let mut session = Self {
            agent,
            endpoint: format!("http://{}:{}/wsman", target.host, target.port),
            authorization: format!("Basic {}", STANDARD.encode(credentials)),
            host: target.host.clone(),
            username: target.username.clone(),
            shell_id: None,
        };

        let options = concat!(
            r#"<w:OptionSet><w:Option Name="WINRS_NOPROFILE">FALSE</w:Option>"#,
            r#"<w:Option Name="WINRS_CODEPAGE">65001</w:Option></w:OptionSet>"#
        );
        let body = concat!(
            "<rsp:Shell><rsp:InputStreams>stdin</rsp:InputStreams>",
            "<rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>"
        );
        let reply = session.call(ACTION_CREATE, options, body, RECEIVE_TIMEOUT_SECS)?;
        let shell_id = capture(&SHELL_ID_RE, &reply)
            .ok_or_else(|| Error::WinRm("Create response carries no ShellId".to_string()))?;
        debug!("Opened WinRM shell {}", shell_id);
        session.shell_id = Some(shell_id);
        Ok(session)
    }

    fn shell_id(&self) -> Result<&str> {
        self.shell_id.as_deref().ok_or(Error::NotConnected)
    }

    fn post(&self, action: &str, options: &str, body: &str, timeout_secs: u64) -> Result<Reply> {
        let selector = match &self.shell_id {
            Some(id) => format!(
                r#"<w:SelectorSet><w:Selector Name="ShellId">{}</w:Selector></w:SelectorSet>"#,
                id
            ),
            None => String::new(),
        };
        let request = envelope(&self.endpoint, action, &selector, options, body, timeout_secs);

        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &self.authorization)
            .set("Content-Type", "application/soap+xml;charset=UTF-8")
            .send_string(&request);

        match response {
            Ok(resp) => Ok(Reply::Body(resp.into_string()?)),
            Err(ureq::Error::Status(401, _)) => Err(Error::AuthFailed {
                user: self.username.clone(),
                host: self.host.clone(),
            }),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                if body.contains(FAULT_OPERATION_TIMEOUT) {
                    return Ok(Reply::TimedOut);
                }
                Err(Error::WinRm(format!("HTTP {}: {}", code, fault_text(&body))))
            }
            Err(ureq::Error::Transport(t)) => {
                Err(Error::Unreachable(format!("{}: {}", self.host, t)))
            }
        }
    }

    fn call(&self, action: &str, options: &str, body: &str, timeout_secs: u64) -> Result<String> {
        match self.post(action, options, body, timeout_secs)? {
            Reply::Body(body) => Ok(body),
            Reply::TimedOut => Err(Error::WinRm(format!("operation timed out: {}", action))),
        }
    }

    /// Runs a command line in the shell and streams its output.
    fn run(&mut self, command_line: &str, output: &mut dyn OutputHandler) -> Result<i32> {
        self.shell_id()?;
        let options = concat!(
            r#"<w:OptionSet><w:Option Name="WINRS_CONSOLEMODE_STDIN">TRUE</w:Option>"#,
            r#"<w:Option Name="WINRS_SKIP_CMD_SHELL">FALSE</w:Option></w:OptionSet>"#
        );
        let body = format!(
            "<rsp:CommandLine><rsp:Command>{}</rsp:Command></rsp:CommandLine>",
            xml_escape(command_line)
        );
        let reply = self.call(ACTION_COMMAND, options, &body, RECEIVE_TIMEOUT_SECS)?;
        let command_id = capture(&COMMAND_ID_RE, &reply)
            .ok_or_else(|| Error::WinRm("Command response carries no CommandId".to_string()))?;

        let status = self.receive_all(&command_id, output);
        if let Err(e) = self.signal_terminate(&command_id) {
            debug!("Failed to release command {}: {}", command_id, e);
        }
        status
    }

    fn receive_all(&self, command_id: &str, output: &mut dyn OutputHandler) -> Result<i32> {
        let body = format!(
            r#"<rsp:Receive><rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream></rsp:Receive>"#,
            command_id
        );
        loop {
            let xml = match self.post(ACTION_RECEIVE, "", &body, RECEIVE_TIMEOUT_SECS)? {
                Reply::Body(xml) => xml,
                Reply::TimedOut => continue,
            };
            let chunk = parse_receive(&xml)?;
            for (name, data) in &chunk.streams {
                match name.as_str() {
                    "stderr" => output.stderr(data),
                    _ => output.stdout(data),
                }
            }
            if chunk.done {
                return Ok(chunk.exit_code.unwrap_or(0));
            }
        }
    }

    fn signal_terminate(&self, command_id: &str) -> Result<()> {
        let body = format!(
            r#"<rsp:Signal CommandId="{}"><rsp:Code>{}</rsp:Code></rsp:Signal>"#,
            command_id, SIGNAL_TERMINATE
        );
        self.call(ACTION_SIGNAL, "", &body, RECEIVE_TIMEOUT_SECS)?;
        Ok(())
    }

    /// Runs a PowerShell script, collecting its output.
    fn powershell(&mut self, script: &str) -> Result<(i32, Capture)> {
        let mut capture = Capture::default();
        let status = self.run(&encode_powershell(script), &mut capture)?;
        Ok((status, capture))
    }
}

impl RemoteSession for WinRmSession {
    fn protocol(&self) -> Protocol {
        Protocol::WinRm
    }

    fn exec(
        &mut self,
        command: &str,
        options: &RunOptions,
        output: &mut dyn OutputHandler,
    ) -> Result<i32> {
        if options.use_powershell {
            self.run(&encode_powershell(command), output)
        } else {
            self.run(command, output)
        }
    }

    fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        let script = format!(
            "$p = {}; if (Test-Path -LiteralPath $p -PathType Leaf) {{ \
             [Convert]::ToBase64String([IO.File]::ReadAllBytes($p)) }} else {{ exit {} }}",
            ps_path(path),
            MISSING_FILE_STATUS
        );
        let (status, capture) = self.powershell(&script)?;
        match status {
            0 => {
                let text = String::from_utf8_lossy(&capture.stdout);
                let compact: String = text.split_whitespace().collect();
                let bytes = STANDARD
                    .decode(compact)
                    .map_err(|e| Error::WinRm(format!("Invalid file contents from {}: {}", path, e)))?;
                Ok(Some(bytes))
            }
            MISSING_FILE_STATUS => Ok(None),
            _ => Err(capture.failure(&format!("read {}", path), status)),
        }
    }

    fn write_file(&mut self, path: &str, contents: &[u8], mode: i32) -> Result<()> {
        debug!("Writing {} ({} bytes, mode {:o} not applied on Windows)", path, contents.len(), mode);
        let target = ps_path(path);

        let (status, capture) = self.powershell(&format!(
            "[IO.File]::WriteAllBytes({}, [byte[]]@())",
            target
        ))?;
        if status != 0 {
            return Err(capture.failure(&format!("create {}", path), status));
        }

        for chunk in contents.chunks(WRITE_CHUNK_SIZE) {
            let script = format!(
                "$b = [Convert]::FromBase64String('{}'); \
                 $f = [IO.File]::Open({}, [IO.FileMode]::Append); \
                 try {{ $f.Write($b, 0, $b.Length) }} finally {{ $f.Close() }}",
                STANDARD.encode(chunk),
                target
            );
            let (status, capture) = self.powershell(&script)?;
            if status != 0 {
                return Err(capture.failure(&format!("write {}", path), status));
            }
        }
        Ok(())
    }

    fn make_dir(&mut self, path: &str) -> Result<()> {
        let script = format!(
            "New-Item -ItemType Directory -Force -Path {} | Out-Null",
            ps_path(path)
        );
        let (status, capture) = self.powershell(&script)?;
        if status != 0 {
            return Err(capture.failure(&format!("mkdir {}", path), status));
        }
        Ok(())
    }

    fn stat(&mut self, path: &str) -> Result<Option<RemoteStat>> {
        let script = format!(
            "$p = {}; if (-not (Test-Path -LiteralPath $p)) {{ exit {} }}; \
             if ((Get-Item -LiteralPath $p -Force).PSIsContainer) {{ 'dir' }} else {{ 'file' }}",
            ps_path(path),
            MISSING_FILE_STATUS
        );
        let (status, capture) = self.powershell(&script)?;
        match status {
            0 => {
                let is_dir = String::from_utf8_lossy(&capture.stdout).trim() == "dir";
                // NTFS ACLs have no mode bits to report.
                let mode = if is_dir { 0o755 } else { 0o644 };
                Ok(Some(RemoteStat { is_dir, mode }))
            }
            MISSING_FILE_STATUS => Ok(None),
            _ => Err(capture.failure(&format!("stat {}", path), status)),
        }
    }

    fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let script = format!("Get-ChildItem -LiteralPath {} -Force -Name", ps_path(path));
        let (status, capture) = self.powershell(&script)?;
        if status != 0 {
            return Err(capture.failure(&format!("list {}", path), status));
        }
        Ok(String::from_utf8_lossy(&capture.stdout)
            .lines()
            .map(str::trim_end)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        if self.shell_id.is_none() {
            return Ok(());
        }
        let result = self.call(ACTION_DELETE, "", "", RECEIVE_TIMEOUT_SECS);
        self.shell_id = None;
        if let Err(e) = result {
            warn!("Failed to delete WinRM shell on {}: {}", self.host, e);
        }
        Ok(())
    }
}

/// Output of a helper script, kept whole.
#[derive(Debug, Default)]
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Capture {
    fn failure(&self, what: &str, status: i32) -> Error {
        Error::WinRm(format!(
            "failed to {} (exit {}): {}",
            what,
            status,
            String::from_utf8_lossy(&self.stderr).trim()
        ))
    }
}

impl OutputHandler for Capture {
    fn stdout(&mut self, chunk: &[u8]) {
        self.stdout.extend_from_slice(chunk);
    }

    fn stderr(&mut self, chunk: &[u8]) {
        self.stderr.extend_from_slice(chunk);
    }
}

/// Decoded content of one Receive response.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ReceiveChunk {
    pub streams: Vec<(String, Vec<u8>)>,
    pub exit_code: Option<i32>,
    pub done: bool,
}

pub(crate) fn parse_receive(xml: &str) -> Result<ReceiveChunk> {
    let mut chunk = ReceiveChunk::default();
    for caps in STREAM_RE.captures_iter(xml) {
        let attrs = caps.get(1).map_or("", |m| m.as_str());
        let name = capture(&STREAM_NAME_RE, attrs).unwrap_or_else(|| "stdout".to_string());
        let data = match caps.get(2).map(|m| m.as_str().trim()) {
            Some(text) if !text.is_empty() => STANDARD
                .decode(text)
                .map_err(|e| Error::WinRm(format!("Invalid {} stream data: {}", name, e)))?,
            _ => continue,
        };
        chunk.streams.push((name, data));
    }

    if let Some(state) = capture(&STATE_RE, xml) {
        chunk.done = state.ends_with("/Done");
    }
    chunk.exit_code = capture(&EXIT_CODE_RE, xml)
        .and_then(|code| code.parse::<i64>().ok())
        .map(|code| code as i32);
    Ok(chunk)
}

/// Builds the `powershell -EncodedCommand` line for `script`.
pub(crate) fn encode_powershell(script: &str) -> String {
    let script = format!("$ProgressPreference = 'SilentlyContinue'; {}", script);
    let utf16: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    format!(
        "powershell -NoProfile -NonInteractive -EncodedCommand {}",
        STANDARD.encode(utf16)
    )
}

/// Expression resolving `path` against the PowerShell location.
fn ps_path(path: &str) -> String {
    format!(
        "$ExecutionContext.SessionState.Path.GetUnresolvedProviderPathFromPSPath('{}')",
        path.replace('\'', "''")
    )
}

fn envelope(
    endpoint: &str,
    action: &str,
    selector: &str,
    options: &str,
    body: &str,
    timeout_secs: u64,
) -> String {
    format!(
        concat!(
            r#"<s:Envelope {ns}><s:Header>"#,
            r#"<a:To>{to}</a:To>"#,
            r#"<a:ReplyTo><a:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address></a:ReplyTo>"#,
            r#"<w:ResourceURI s:mustUnderstand="true">{resource}</w:ResourceURI>"#,
            r#"<a:Action s:mustUnderstand="true">{action}</a:Action>"#,
            r#"<w:MaxEnvelopeSize s:mustUnderstand="true">153600</w:MaxEnvelopeSize>"#,
            r#"<a:MessageID>uuid:{id}</a:MessageID>"#,
            r#"<w:Locale xml:lang="en-US" s:mustUnderstand="false"/>"#,
            r#"<w:OperationTimeout>PT{timeout}S</w:OperationTimeout>"#,
            r#"{selector}{options}</s:Header><s:Body>{body}</s:Body></s:Envelope>"#
        ),
        ns = NS_ENVELOPE,
        to = endpoint,
        resource = RESOURCE_CMD,
        action = action,
        id = Uuid::new_v4(),
        timeout = timeout_secs,
        selector = selector,
        options = options,
        body = body
    )
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn fault_text(body: &str) -> String {
    capture(&FAULT_TEXT_RE, body).unwrap_or_else(|| "unknown fault".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIVE_RUNNING: &str = r#"<s:Envelope><s:Body><rsp:ReceiveResponse>
<rsp:Stream Name="stdout" CommandId="C1">aGVsbG8K</rsp:Stream>
<rsp:Stream Name="stderr" CommandId="C1">b29wcw==</rsp:Stream>
<rsp:Stream Name="stdout" CommandId="C1" End="true"></rsp:Stream>
<rsp:CommandState CommandId="C1" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Running"/>
</rsp:ReceiveResponse></s:Body></s:Envelope>"#;

    const RECEIVE_DONE: &str = r#"<s:Envelope><s:Body><rsp:ReceiveResponse>
<rsp:Stream Name="stderr" CommandId="C1" End="true"/>
<rsp:CommandState CommandId="C1" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done"><rsp:ExitCode>3</rsp:ExitCode></rsp:CommandState>
</rsp:ReceiveResponse></s:Body></s:Envelope>"#;

    #[test]
    fn test_parse_running_receive() {
        let chunk = parse_receive(RECEIVE_RUNNING).unwrap();
        assert_eq!(
            chunk.streams,
            vec![
                ("stdout".to_string(), b"hello\n".to_vec()),
                ("stderr".to_string(), b"oops".to_vec()),
            ]
        );
        assert!(!chunk.done);
        assert_eq!(chunk.exit_code, None);
    }

    #[test]
    fn test_parse_done_receive() {
        let chunk = parse_receive(RECEIVE_DONE).unwrap();
        assert!(chunk.streams.is_empty());
        assert!(chunk.done);
        assert_eq!(chunk.exit_code, Some(3));
    }

    #[test]
    fn test_unsigned_exit_code_wraps() {
        let xml = r#"<rsp:CommandState State=".../CommandState/Done"><rsp:ExitCode>4294967295</rsp:ExitCode></rsp:CommandState>"#;
        assert_eq!(parse_receive(xml).unwrap().exit_code, Some(-1));
    }

    #[test]
    fn test_bad_stream_data_is_error() {
        let xml = r#"<rsp:Stream Name="stdout">!!!</rsp:Stream>"#;
        assert!(matches!(parse_receive(xml), Err(Error::WinRm(_))));
    }

    #[test]
    fn test_ids_from_responses() {
        let create = r#"<w:SelectorSet><w:Selector Name="ShellId">11-22</w:Selector></w:SelectorSet>"#;
        assert_eq!(capture(&SHELL_ID_RE, create).as_deref(), Some("11-22"));
        let create_body = "<rsp:Shell><rsp:ShellId>33-44</rsp:ShellId></rsp:Shell>";
        assert_eq!(capture(&SHELL_ID_RE, create_body).as_deref(), Some("33-44"));
        let command = "<rsp:CommandResponse><rsp:CommandId>AB-CD</rsp:CommandId></rsp:CommandResponse>";
        assert_eq!(capture(&COMMAND_ID_RE, command).as_deref(), Some("AB-CD"));
    }

    #[test]
    fn test_fault_text() {
        let fault = r#"<s:Fault><s:Reason><s:Text xml:lang="en-US">Access is denied.</s:Text></s:Reason></s:Fault>"#;
        assert_eq!(fault_text(fault), "Access is denied.");
        assert_eq!(fault_text("<html/>"), "unknown fault");
    }

    #[test]
    fn test_encode_powershell_is_utf16le() {
        let line = encode_powershell("Write-Output 1");
        let encoded = line
            .strip_prefix("powershell -NoProfile -NonInteractive -EncodedCommand ")
            .unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        let units: Vec<u16> = bytes
            .chunks(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let script = String::from_utf16(&units).unwrap();
        assert!(script.ends_with("; Write-Output 1"));
    }

    #[test]
    fn test_envelope_escapes_command() {
        assert_eq!(xml_escape(r#"a<b & "c""#), "a&lt;b &amp; &quot;c&quot;");
        let env = envelope("http://h:5985/wsman", ACTION_COMMAND, "", "", "<x/>", 20);
        assert!(env.contains("<a:To>http://h:5985/wsman</a:To>"));
        assert!(env.contains("<w:OperationTimeout>PT20S</w:OperationTimeout>"));
        assert!(env.ends_with("<s:Body><x/></s:Body></s:Envelope>"));
    }

    #[test]
    fn test_ps_path_quotes() {
        assert_eq!(
            ps_path("C:\\it's"),
            "$ExecutionContext.SessionState.Path.GetUnresolvedProviderPathFromPSPath('C:\\it''s')"
        );
    }

    /// Serves one canned response per connection, reporting each request's action.
    fn fake_wsman(responses: Vec<(u16, String)>) -> (u16, std::sync::mpsc::Receiver<String>) {
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            for (status, body) in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);
                let mut length = 0;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut request = vec![0u8; length];
                reader.read_exact(&mut request).unwrap();
                let request = String::from_utf8(request).unwrap();
                let action = Regex::new(r"<a:Action[^>]*>([^<]+)<").unwrap();
                tx.send(capture(&action, &request).unwrap_or_default()).unwrap();

                let mut stream = reader.into_inner();
                write!(
                    stream,
                    "HTTP/1.1 {} X\r\nContent-Type: application/soap+xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                )
                .unwrap();
            }
        });
        (port, rx)
    }

    #[test]
    fn test_failed_connect_check_deletes_shell() {
        let created = r#"<s:Envelope><s:Body><rsp:Shell><rsp:ShellId>S1</rsp:ShellId></rsp:Shell></s:Body></s:Envelope>"#;
        let fault = r#"<s:Envelope><s:Body><s:Fault><s:Reason><s:Text>Access denied</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>"#;
        let (port, actions) = fake_wsman(vec![
            (200, created.to_string()),
            (500, fault.to_string()),
            (200, "<s:Envelope/>".to_string()),
        ]);

        let target = Target::new("127.0.0.1", port, "Administrator", "pw", Protocol::WinRm)
            .with_timeout(Duration::from_secs(2));
        let err = WinRmConnector::new(Duration::from_secs(30))
            .connect_once(&target)
            .err()
            .unwrap();
        assert!(matches!(err, Error::WinRm(ref msg) if msg.contains("Access denied")), "{err}");

        let seen: Vec<String> = actions.try_iter().collect();
        assert_eq!(seen, vec![ACTION_CREATE, ACTION_COMMAND, ACTION_DELETE]);
    }
}
