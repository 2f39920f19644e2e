//! One-way command channel from the kernel to the plotting consumer.
//!
//! Every send goes through the channel's send-lock, so command traffic from
//! kernel methods and data traffic from the measurement loop never interleave
//! partial writes. The lock is distinct from the snapshot buffer lock.
//!
//! # Wire format
//!
//! For a consumer running in another process both directions are
//! line-delimited JSON:
//!
//! ```text
//! kernel -> consumer   {"command":"data","payload":{"points":[[[0.0,4.2]]]}}
//!                      {"command":"autoscale_on"}
//! consumer -> kernel   {"event":"request_data"}
//! ```

use std::io::Write;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{KernelError, KernelResult};
use crate::snapshot::PlotPointSet;

/// Tagged command sent to the plotting consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum Command {
    /// Latest plot points, answering one `request_data` edge.
    Data(PlotPointSet),
    /// Reopen a hidden plot window.
    Replot,
    /// Let axis limits follow the data.
    AutoscaleOn,
    /// Freeze the current axis limits.
    AutoscaleOff,
    /// Drop all plotted points.
    Clear,
    /// Shut the consumer down.
    Quit,
}

impl Command {
    /// Short name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Data(_) => "data",
            Command::Replot => "replot",
            Command::AutoscaleOn => "autoscale_on",
            Command::AutoscaleOff => "autoscale_off",
            Command::Clear => "clear",
            Command::Quit => "quit",
        }
    }
}

/// Event reported by the plotting consumer, applied to the kernel's signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConsumerEvent {
    /// Ready for the next data batch.
    RequestData,
    /// A plot window is on screen.
    PlotShown,
    /// The plot window was closed.
    PlotHidden,
    /// An autoscale or clear command was carried out.
    CommandDone,
}

/// Transport underneath a [`CommandChannel`].
pub trait CommandSink: Send {
    /// Deliver one command, failing once the consumer side is gone.
    fn send(&mut self, command: &Command) -> KernelResult<()>;
}

/// In-process transport backed by an unbounded tokio channel.
pub struct LocalSink {
    tx: mpsc::UnboundedSender<Command>,
}

impl LocalSink {
    /// Sink over the sending half of an in-process channel.
    pub fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx }
    }
}

impl CommandSink for LocalSink {
    fn send(&mut self, command: &Command) -> KernelResult<()> {
        self.tx
            .send(command.clone())
            .map_err(|_| KernelError::Channel("plotting consumer hung up".into()))
    }
}

/// Line-delimited JSON transport over any writer (a child's stdin).
pub struct JsonLineSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLineSink<W> {
    /// Sink writing one JSON line per command to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> CommandSink for JsonLineSink<W> {
    fn send(&mut self, command: &Command) -> KernelResult<()> {
        let line = serde_json::to_string(command)
            .map_err(|e| KernelError::Channel(format!("failed to encode {}: {e}", command.name())))?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Serialised sender of [`Command`]s.
pub struct CommandChannel {
    sink: Mutex<Box<dyn CommandSink>>,
}

impl CommandChannel {
    /// Channel sending through `sink`.
    pub fn new(sink: Box<dyn CommandSink>) -> Self {
        Self { sink: Mutex::new(sink) }
    }

    /// Send one command under the send-lock.
    pub fn send(&self, command: Command) -> KernelResult<()> {
        self.sink.lock().send(&command)?;
        tracing::trace!(command = command.name(), "Sent command to plotting consumer");
        Ok(())
    }
}

/// Parse one consumer event line.
pub fn parse_event(line: &str) -> KernelResult<ConsumerEvent> {
    serde_json::from_str(line.trim())
        .map_err(|e| KernelError::Channel(format!("malformed consumer event {line:?}: {e}")))
}

/// Parse one command line.
pub fn parse_command(line: &str) -> KernelResult<Command> {
    serde_json::from_str(line.trim())
        .map_err(|e| KernelError::Channel(format!("malformed command {line:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let line = serde_json::to_string(&Command::AutoscaleOn).unwrap();
        assert_eq!(line, r#"{"command":"autoscale_on"}"#);

        let data = Command::Data(PlotPointSet {
            points: vec![vec![(0.0, 4.2)]],
        });
        let line = serde_json::to_string(&data).unwrap();
        assert_eq!(line, r#"{"command":"data","payload":{"points":[[[0.0,4.2]]]}}"#);
        assert_eq!(parse_command(&line).unwrap(), data);

        let event = serde_json::to_string(&ConsumerEvent::RequestData).unwrap();
        assert_eq!(event, r#"{"event":"request_data"}"#);
        assert_eq!(parse_event("{\"event\":\"plot_hidden\"}\n").unwrap(), ConsumerEvent::PlotHidden);
        assert!(parse_event("garbage").is_err());
    }

    #[test]
    fn test_local_channel_delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = CommandChannel::new(Box::new(LocalSink::new(tx)));

        channel.send(Command::Clear).unwrap();
        channel
            .send(Command::Data(PlotPointSet { points: vec![vec![(1.0, 2.0)]] }))
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Command::Clear);
        assert!(matches!(rx.try_recv().unwrap(), Command::Data(_)));

        drop(rx);
        assert!(matches!(channel.send(Command::Quit), Err(KernelError::Channel(_))));
    }

    #[test]
    fn test_json_sink_writes_lines() {
        let mut sink = JsonLineSink::new(Vec::new());
        sink.send(&Command::Replot).unwrap();
        sink.send(&Command::Quit).unwrap();

        let text = String::from_utf8(sink.writer).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, vec![r#"{"command":"replot"}"#, r#"{"command":"quit"}"#]);
    }
}
