use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Destination for report lines.
///
/// Every call writes one complete line; implementations flush before
/// returning so a line is never observed half written.
pub trait LogSink: Send {
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    fn blank_line(&mut self) -> io::Result<()> {
        self.write_line("")
    }
}

/// Durable report file.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Creates (or truncates) the report file.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }
}

/// Mirrors the report on stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{line}")?;
        out.flush()
    }
}

/// Fans each line out to several sinks, in order.
#[derive(Default)]
pub struct TeeSink {
    sinks: Vec<Box<dyn LogSink>>,
}

impl TeeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl LogSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl LogSink for TeeSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        for sink in &mut self.sinks {
            sink.write_line(line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub use memory::MemorySink;
