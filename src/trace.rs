use crate::stats::Stats;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Stdout, Write};
use std::path::Path;
use std::time::Instant;

pub const COLUMNS: &str =
    "Function,Time(us),Alloc'd Space,Alloc'd Chunks,Free Space,Free Chunks,Regions";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Alloc,
    Free,
}

impl Op {
    pub fn tag(self) -> &'static str {
        match self {
            Op::Alloc => "alloc",
            Op::Free => "free",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Receives the heap's counters after every successful operation.
pub trait TraceSink {
    fn record(&mut self, op: Op, stats: &Stats) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Monotonic microsecond clock.
#[derive(Clone, Copy, Debug)]
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_micros(&self) -> u128 {
        self.start.elapsed().as_micros()
    }
}

/// Comma separated trace lines, preceded by a column header on first use.
/// Elapsed time is measured from that first record.
pub struct CsvTrace<W: Write> {
    out: W,
    timer: Option<Timer>,
}

impl CsvTrace<BufWriter<File>> {
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self::new(BufWriter::new(file)))
    }
}

impl CsvTrace<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> CsvTrace<W> {
    pub fn new(out: W) -> Self {
        Self { out, timer: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TraceSink for CsvTrace<W> {
    fn record(&mut self, op: Op, stats: &Stats) -> io::Result<()> {
        let timer = match self.timer {
            Some(timer) => timer,
            None => {
                writeln!(self.out, "{COLUMNS}")?;
                *self.timer.insert(Timer::start())
            }
        };

        writeln!(
            self.out,
            "{},{},{},{},{},{},{}",
            op,
            timer.elapsed_micros(),
            stats.allocated_space,
            stats.allocated_chunks,
            stats.free_space,
            stats.free_chunks,
            stats.regions
        )
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(line: &str) -> Vec<&str> {
        line.split(',').collect()
    }

    #[test]
    fn op_tags() {
        assert_eq!(Op::Alloc.tag(), "alloc");
        assert_eq!(Op::Free.to_string(), "free");
    }

    #[test]
    fn header_written_once() {
        let mut trace = CsvTrace::new(Vec::new());
        let stats = Stats {
            allocated_space: 72,
            allocated_chunks: 1,
            free_space: 3992,
            free_chunks: 1,
            regions: 1,
        };

        trace.record(Op::Alloc, &stats).unwrap();
        trace.record(Op::Free, &Stats::default()).unwrap();

        let out = String::from_utf8(trace.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], COLUMNS);

        let alloc = fields(lines[1]);

        assert_eq!(alloc[0], "alloc");
        assert!(alloc[1].parse::<u128>().is_ok());
        assert_eq!(&alloc[2..], ["72", "1", "3992", "1", "1"]);

        let free = fields(lines[2]);

        assert_eq!(free[0], "free");
        assert_eq!(&free[2..], ["0", "0", "0", "0", "0"]);
    }

    #[test]
    fn empty_trace_has_no_header() {
        let trace = CsvTrace::new(Vec::new());

        assert!(trace.into_inner().is_empty());
    }

    #[test]
    fn timer_is_monotonic() {
        let timer = Timer::start();
        let first = timer.elapsed_micros();

        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(timer.elapsed_micros() >= first + 1000);
    }

    #[test]
    fn append_to_file() {
        let path = std::env::temp_dir().join(format!("segalloc-trace-{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let mut trace = CsvTrace::append(&path).unwrap();

            trace.record(Op::Alloc, &Stats::default()).unwrap();
            trace.flush().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();

        assert!(contents.starts_with(COLUMNS));
        assert_eq!(contents.lines().count(), 2);

        std::fs::remove_file(&path).unwrap();
    }
}
