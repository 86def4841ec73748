use handshake_pairing::ScanSource;
use log::info;
use std::io::BufRead;

/// Reads one decoded QR payload per line, e.g. piped from a scanner tool.
pub struct LineScanSource<R> {
    reader: R,
    running: bool,
}

impl<R: BufRead> LineScanSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            running: false,
        }
    }
}

impl<R: BufRead> ScanSource for LineScanSource<R> {
    fn start(&mut self) -> anyhow::Result<()> {
        info!("waiting for scanned payloads, one per line");
        self.running = true;
        Ok(())
    }

    fn next_scan(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        while self.running {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let scanned = line.trim();
            if !scanned.is_empty() {
                return Ok(Some(scanned.to_string()));
            }
        }
        Ok(None)
    }

    fn stop(&mut self) {
        self.running = false;
    }
}
