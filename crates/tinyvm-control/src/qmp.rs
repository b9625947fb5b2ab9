use crate::ControlError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const IO_TIMEOUT: Duration = Duration::from_secs(10);
const ALREADY_NEGOTIATED: &str = "already complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    Negotiated,
    AlreadyComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatus {
    pub status: String,
    pub running: bool,
    #[serde(default)]
    pub singlestep: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    class: String,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(rename = "QMP")]
    greeting: Option<Value>,
    #[serde(rename = "return")]
    ret: Option<Value>,
    error: Option<ErrorBody>,
    event: Option<String>,
}

/// A connected QMP session.
pub struct QmpClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    greeting: Value,
}

impl QmpClient {
    /// Connect and consume the server greeting. Capabilities are not yet
    /// negotiated.
    pub fn connect(socket: &Path) -> Result<Self, ControlError> {
        let stream = UnixStream::connect(socket).map_err(|source| ControlError::Connect {
            path: socket.display().to_string(),
            source,
        })?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        let writer = stream.try_clone()?;
        let mut client = Self {
            reader: BufReader::new(stream),
            writer,
            greeting: Value::Null,
        };

        let first = client.read_message()?;
        client.greeting = first
            .greeting
            .ok_or_else(|| ControlError::Protocol("expected QMP greeting".to_owned()))?;
        debug!("QMP greeting: {}", client.greeting);
        Ok(client)
    }

    /// Connect and negotiate in one step.
    pub fn open(socket: &Path) -> Result<Self, ControlError> {
        let mut client = Self::connect(socket)?;
        client.negotiate()?;
        Ok(client)
    }

    pub fn greeting(&self) -> &Value {
        &self.greeting
    }

    /// Enter command mode. A server that reports negotiation as already
    /// complete is treated as success.
    pub fn negotiate(&mut self) -> Result<Negotiation, ControlError> {
        match self.execute("qmp_capabilities", None) {
            Ok(_) => {
                info!("QMP capabilities negotiated");
                Ok(Negotiation::Negotiated)
            }
            Err(ControlError::Command { desc, .. }) if desc.contains(ALREADY_NEGOTIATED) => {
                info!("QMP capabilities were already negotiated");
                Ok(Negotiation::AlreadyComplete)
            }
            Err(e) => Err(e),
        }
    }

    /// Send one command and wait for its reply, skipping async events.
    pub fn execute(&mut self, command: &str, arguments: Option<Value>) -> Result<Value, ControlError> {
        let mut request = json!({ "execute": command });
        if let Some(args) = arguments {
            request["arguments"] = args;
        }
        let mut line = serde_json::to_string(&request)
            .map_err(|e| ControlError::Protocol(e.to_string()))?;
        line.push('\n');
        debug!("QMP -> {}", line.trim_end());
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;

        loop {
            let msg = self.read_message()?;
            if let Some(event) = msg.event {
                debug!("QMP event {event} skipped");
                continue;
            }
            if let Some(err) = msg.error {
                return Err(ControlError::Command {
                    command: command.to_owned(),
                    class: err.class,
                    desc: err.desc,
                });
            }
            if let Some(ret) = msg.ret {
                return Ok(ret);
            }
            return Err(ControlError::Protocol(format!(
                "unexpected reply to '{command}'"
            )));
        }
    }

    pub fn pause(&mut self) -> Result<(), ControlError> {
        self.execute("stop", None).map(drop)
    }

    pub fn resume(&mut self) -> Result<(), ControlError> {
        self.execute("cont", None).map(drop)
    }

    /// Ask the guest to power down and close the session.
    pub fn powerdown(mut self) -> Result<(), ControlError> {
        self.execute("system_powerdown", None)?;
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    pub fn query_status(&mut self) -> Result<VmStatus, ControlError> {
        let ret = self.execute("query-status", None)?;
        serde_json::from_value(ret).map_err(|e| ControlError::Protocol(e.to_string()))
    }

    fn read_message(&mut self) -> Result<Message, ControlError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(ControlError::Protocol(
                    "connection closed by QMP server".to_owned(),
                ));
            }
            if !line.trim().is_empty() {
                break;
            }
        }
        debug!("QMP <- {}", line.trim_end());
        serde_json::from_str(&line).map_err(|e| ControlError::Protocol(e.to_string()))
    }
}
