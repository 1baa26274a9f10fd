use crate::dgtz::EventInfo;
use crate::waveform::Waveform;
use ndarray::Array2;
use std::{
    collections::VecDeque,
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

/// A decoded event detached from the session pools, ready to be shipped to
/// the writer thread.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub info: EventInfo,
    /// Physical channel of every row of `data`.
    pub channels: Vec<usize>,
    pub data: Array2<u16>,
}

impl RecordedEvent {
    /// Bytes the event took in the readout buffer.
    pub fn size(&self) -> usize {
        self.info.event_size as usize
    }
}

impl From<&Waveform> for RecordedEvent {
    fn from(wf: &Waveform) -> Self {
        Self {
            info: *wf.info(),
            channels: wf.enabled_channels().to_vec(),
            data: wf.data().clone(),
        }
    }
}

/// Readout statistics with all-time totals and a sliding window rate.
#[derive(Debug, Clone)]
pub struct Counter {
    pub total_size: usize,
    pub n_events: usize,
    /// Creation or last reset.
    pub t_begin: Instant,

    window: Duration,
    recent: VecDeque<(Instant, usize)>,
    bytes_in_window: usize,
}

impl Default for Counter {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(1))
    }
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(window: Duration) -> Self {
        Counter {
            total_size: 0,
            n_events: 0,
            t_begin: Instant::now(),
            window,
            recent: VecDeque::new(),
            bytes_in_window: 0,
        }
    }

    /// MB/s since `t_begin`.
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_size as f64 / secs) / (1024.0 * 1024.0)
    }

    /// MB/s over the sliding window.
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        (self.bytes_in_window as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Events per second over the sliding window.
    pub fn event_rate(&self) -> f64 {
        self.recent.len() as f64 / self.window.as_secs_f64().max(1e-6)
    }

    pub fn increment(&mut self, size: usize) {
        self.increment_at(Instant::now(), size);
    }

    fn increment_at(&mut self, now: Instant, size: usize) {
        self.total_size += size;
        self.n_events += 1;

        self.recent.push_back((now, size));
        self.bytes_in_window += size;
        while let Some(&(ts, sz)) = self.recent.front() {
            if now.duration_since(ts) <= self.window {
                break;
            }
            self.recent.pop_front();
            self.bytes_in_window -= sz;
        }
    }

    pub fn reset(&mut self) {
        self.total_size = 0;
        self.n_events = 0;
        self.t_begin = Instant::now();
        self.recent.clear();
        self.bytes_in_window = 0;
    }
}

/// `{output_dir}/camp{campaign}`, created when missing.
pub fn create_camp_dir(output_dir: impl AsRef<Path>, campaign: usize) -> io::Result<PathBuf> {
    let path = output_dir.as_ref().join(format!("camp{campaign}"));
    if !path.exists() {
        fs::create_dir_all(&path)?;
        log::info!("Created campaign directory {}", path.display());
    }
    Ok(path)
}

/// One past the highest `run{N}_*` file in `camp_dir`, 0 when there is none.
pub fn next_run_number(camp_dir: impl AsRef<Path>) -> io::Result<usize> {
    let max_run = fs::read_dir(camp_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let stripped = name.to_str()?.strip_prefix("run")?;
            stripped.split('_').next()?.parse::<usize>().ok()
        })
        .max();
    Ok(max_run.map_or(0, |max| max + 1))
}

/// `run{run}_{file}.h5`; runs are split over several files once they get
/// long.
pub fn run_file_name(run: usize, file: usize) -> String {
    format!("run{run}_{file}.h5")
}
