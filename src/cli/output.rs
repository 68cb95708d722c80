//! Record output
//!
//! Renders device records for stdout or a file. JSON output is an array
//! written once the run finishes; JSON lines and text stream one record at
//! a time so partial results survive an interrupted run.

use crate::core::orchestrator::RecordSink;
use crate::core::record::{DeviceRecord, ProbeOutcome, RecordDetails};
use clap::ValueEnum;
use std::io::{self, Write};

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON array of records
    #[default]
    Json,
    /// One JSON object per line
    #[value(name = "jsonl")]
    JsonLines,
    /// Human-readable text
    Text,
}

/// Record sink writing to any `Write`
pub struct RecordWriter<W: Write + Send> {
    out: W,
    format: OutputFormat,
    pretty: bool,
    buffered: Vec<DeviceRecord>,
}

impl RecordWriter<io::Stdout> {
    /// Writer on stdout; JSON is pretty-printed when stdout is a terminal
    pub fn stdout(format: OutputFormat) -> Self {
        let pretty = atty::is(atty::Stream::Stdout);
        Self::new(io::stdout(), format).pretty(pretty)
    }
}

impl<W: Write + Send> RecordWriter<W> {
    /// Writer on `out`
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            pretty: false,
            buffered: Vec::new(),
        }
    }

    /// Pretty-print JSON arrays
    #[must_use]
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Flush buffered output and return the writer
    pub fn finish(mut self) -> io::Result<W> {
        if self.format == OutputFormat::Json {
            if self.pretty {
                serde_json::to_writer_pretty(&mut self.out, &self.buffered)?;
            } else {
                serde_json::to_writer(&mut self.out, &self.buffered)?;
            }
            writeln!(self.out)?;
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write + Send> RecordSink for RecordWriter<W> {
    fn emit(&mut self, record: &DeviceRecord) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                self.buffered.push(record.clone());
                return Ok(());
            }
            OutputFormat::JsonLines => {
                serde_json::to_writer(&mut self.out, record)?;
                writeln!(self.out)?;
            }
            OutputFormat::Text => write_text(&mut self.out, record)?,
        }
        self.out.flush()
    }
}

fn write_text(out: &mut impl Write, record: &DeviceRecord) -> io::Result<()> {
    writeln!(
        out,
        "0x{:08x} {} {} {} (from {})",
        record.apid, record.model, record.mac, record.address, record.source
    )?;

    match &record.details {
        RecordDetails::Discover => {}
        RecordDetails::Scan(scan) => {
            for (id, outcome) in &scan.probes {
                match outcome {
                    ProbeOutcome::Supported { payload } => writeln!(out, "  {id}  {payload}")?,
                    ProbeOutcome::Unsupported { code } => writeln!(out, "  {id}  unsupported (0x{code:02x})")?,
                    ProbeOutcome::Invalid { reply_id } => {
                        writeln!(out, "  {id}  invalid reply id 0x{reply_id:02x}")?;
                    }
                }
            }
            if !scan.complete {
                writeln!(out, "  (incomplete)")?;
            }
        }
        RecordDetails::Query(info) => {
            writeln!(out, "  name      {}", info.name)?;
            writeln!(out, "  ip        {}", info.ip)?;
            writeln!(out, "  netmask   {}", info.netmask)?;
            writeln!(out, "  gateway   {}", info.gateway)?;
            writeln!(out, "  firmware  {}", info.firmware)?;
            writeln!(out, "  serial    {}", info.serial)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::discovery::DiscoveredDevice;
    use crate::core::protocol::DeviceId;
    use crate::core::record::ScanResult;
    use std::net::Ipv4Addr;

    fn record(details: RecordDetails) -> DeviceRecord {
        let device = DiscoveredDevice {
            device_id: DeviceId::new(0x0055_5555, 0x1a51, "00:90:e8:aa:aa:aa".parse().unwrap()),
            address: Ipv4Addr::new(192, 168, 127, 254),
            source: "192.168.127.254:4800".parse().unwrap(),
        };
        DeviceRecord::new(&device, details)
    }

    #[test]
    fn test_json_array_written_on_finish() {
        let mut writer = RecordWriter::new(Vec::new(), OutputFormat::Json);
        writer.emit(&record(RecordDetails::Discover)).unwrap();
        writer.emit(&record(RecordDetails::Discover)).unwrap();
        let out = writer.finish().unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[0]["apid"], "0x00555555");
    }

    #[test]
    fn test_empty_json_is_empty_array() {
        let out = RecordWriter::new(Vec::new(), OutputFormat::Json).finish().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[]\n");
    }

    #[test]
    fn test_json_lines() {
        let mut writer = RecordWriter::new(Vec::new(), OutputFormat::JsonLines);
        writer.emit(&record(RecordDetails::Discover)).unwrap();
        writer.emit(&record(RecordDetails::Discover)).unwrap();
        let out = String::from_utf8(writer.finish().unwrap()).unwrap();

        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["mode"], "discover");
    }

    #[test]
    fn test_text_scan() {
        let mut scan = ScanResult::default();
        scan.insert(0x05, ProbeOutcome::Unsupported { code: 4 });
        scan.insert(
            0x10,
            ProbeOutcome::Supported {
                payload: "cafe".to_string(),
            },
        );

        let mut writer = RecordWriter::new(Vec::new(), OutputFormat::Text);
        writer.emit(&record(RecordDetails::Scan(scan))).unwrap();
        let out = String::from_utf8(writer.finish().unwrap()).unwrap();

        assert!(out.starts_with("0x00555555 1a51 00:90:e8:aa:aa:aa 192.168.127.254"));
        assert!(out.contains("  0x05  unsupported (0x04)"));
        assert!(out.contains("  0x10  cafe"));
        assert!(out.contains("(incomplete)"));
    }
}
