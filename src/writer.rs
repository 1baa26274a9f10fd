use crate::utils::{run_file_name, RecordedEvent};
use anyhow::{anyhow, Result};
use hdf5::{Attribute, Dataset, File};
use ndarray::{s, Array1, Array3};
use std::path::PathBuf;

/// Layout and compression shared by every file of a run.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    /// Physical channel of every waveform row.
    pub channels: Vec<usize>,
    pub n_samples: usize,
    /// A new file is started once this many events are written.
    pub max_events_per_file: usize,
    /// Events buffered in memory between writes, also the chunk size.
    pub buffer_capacity: usize,
    pub compression_level: u8,
    pub blosc_threads: u8,
}

/// Writes one run as `run{N}_{k}.h5` files in a campaign directory.
pub struct HDF5Writer {
    dir: PathBuf,
    run_num: usize,
    file_num: usize,
    settings: WriterSettings,
    current: RunFile,
}

impl HDF5Writer {
    pub fn new(dir: impl Into<PathBuf>, run_num: usize, settings: WriterSettings) -> Result<Self> {
        if settings.max_events_per_file == 0 || settings.buffer_capacity == 0 {
            return Err(anyhow!("Files and buffers must hold at least one event"));
        }
        if settings.channels.is_empty() || settings.n_samples == 0 {
            return Err(anyhow!("No channels or samples to write"));
        }
        hdf5::filters::blosc_set_nthreads(settings.blosc_threads);

        let dir = dir.into();
        let current = RunFile::create(dir.join(run_file_name(run_num, 0)), &settings)?;
        Ok(Self {
            dir,
            run_num,
            file_num: 0,
            settings,
            current,
        })
    }

    /// Path of the file currently written.
    pub fn current_path(&self) -> PathBuf {
        self.dir.join(run_file_name(self.run_num, self.file_num))
    }

    /// Events written or buffered over the whole run.
    pub fn events_in_run(&self) -> usize {
        self.file_num * self.settings.max_events_per_file + self.current.len()
    }

    pub fn append_event(&mut self, event: &RecordedEvent) -> Result<()> {
        if event.channels != self.settings.channels {
            return Err(anyhow!(
                "Event channels {:?} do not match the run layout {:?}",
                event.channels,
                self.settings.channels
            ));
        }
        if self.current.len() >= self.settings.max_events_per_file {
            self.rotate()?;
        }
        self.current.append(event, &self.settings)
    }

    /// Writes whatever is still buffered.
    pub fn flush(&mut self) -> Result<()> {
        self.current.flush()
    }

    fn rotate(&mut self) -> Result<()> {
        self.current.flush()?;
        self.file_num += 1;
        let path = self.current_path();
        log::info!("Continuing run {} in {}", self.run_num, path.display());
        self.current = RunFile::create(path, &self.settings)?;
        Ok(())
    }
}

impl Drop for HDF5Writer {
    fn drop(&mut self) {
        if let Err(e) = self.current.flush() {
            log::error!("Failed to flush {}: {e}", self.current_path().display());
        }
    }
}

/// Datasets and in-memory buffers of one output file.
struct RunFile {
    _file: File,
    timestamps: Dataset,
    counters: Dataset,
    waveforms: Dataset,
    num_events: Attribute,
    current_event: usize,
    buffer_count: usize,
    ts_buffer: Array1<u32>,
    counter_buffer: Array1<u32>,
    wf_buffer: Array3<u16>,
}

impl RunFile {
    fn create(path: PathBuf, settings: &WriterSettings) -> Result<Self> {
        let file = File::create(&path)?;
        let n_channels = settings.channels.len();
        let max_events = settings.max_events_per_file;
        let chunk = settings.buffer_capacity.min(max_events);

        let timestamps = file
            .new_dataset::<u32>()
            .shape(max_events)
            .chunk(chunk)
            .create("timestamps")?;
        let counters = file
            .new_dataset::<u32>()
            .shape(max_events)
            .chunk(chunk)
            .create("event_counters")?;
        let channels: Vec<u64> = settings.channels.iter().map(|&ch| ch as u64).collect();
        file.new_dataset_builder()
            .with_data(channels.as_slice())
            .create("channels")?;
        let waveforms = file
            .new_dataset::<u16>()
            .shape((max_events, n_channels, settings.n_samples))
            .chunk((chunk, n_channels, settings.n_samples))
            .blosc_zstd(settings.compression_level, true)
            .create("waveforms")?;

        let num_events = file.new_attr::<u64>().create("num_events")?;
        num_events.write_scalar(&0u64)?;

        Ok(Self {
            _file: file,
            timestamps,
            counters,
            waveforms,
            num_events,
            current_event: 0,
            buffer_count: 0,
            ts_buffer: Array1::zeros(chunk),
            counter_buffer: Array1::zeros(chunk),
            wf_buffer: Array3::zeros((chunk, n_channels, settings.n_samples)),
        })
    }

    fn len(&self) -> usize {
        self.current_event + self.buffer_count
    }

    fn append(&mut self, event: &RecordedEvent, settings: &WriterSettings) -> Result<()> {
        let (channels, samples) = event.data.dim();
        if channels != settings.channels.len() || samples != settings.n_samples {
            return Err(anyhow!("Event dimensions do not match dataset dimensions"));
        }

        self.ts_buffer[self.buffer_count] = event.info.trigger_time_tag;
        self.counter_buffer[self.buffer_count] = event.info.event_counter;
        self.wf_buffer
            .slice_mut(s![self.buffer_count, .., ..])
            .assign(&event.data);
        self.buffer_count += 1;

        if self.buffer_count == self.ts_buffer.len() {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer_count == 0 {
            return Ok(());
        }

        let range = self.current_event..self.current_event + self.buffer_count;
        self.timestamps
            .write_slice(&self.ts_buffer.slice(s![..self.buffer_count]), range.clone())?;
        self.counters
            .write_slice(&self.counter_buffer.slice(s![..self.buffer_count]), range.clone())?;
        self.waveforms.write_slice(
            &self.wf_buffer.slice(s![..self.buffer_count, .., ..]),
            (range, .., ..),
        )?;

        self.current_event += self.buffer_count;
        self.buffer_count = 0;
        self.num_events.write_scalar(&(self.current_event as u64))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dgtz::EventInfo;
    use ndarray::Array2;

    fn event(counter: u32, channels: &[usize], samples: usize) -> RecordedEvent {
        RecordedEvent {
            info: EventInfo {
                event_counter: counter,
                trigger_time_tag: counter * 10,
                ..Default::default()
            },
            channels: channels.to_vec(),
            data: Array2::from_elem((channels.len(), samples), counter as u16),
        }
    }

    fn settings(max_events_per_file: usize) -> WriterSettings {
        WriterSettings {
            channels: vec![0, 3],
            n_samples: 8,
            max_events_per_file,
            buffer_capacity: 2,
            compression_level: 2,
            blosc_threads: 1,
        }
    }

    #[test]
    fn runs_rotate_into_numbered_files() {
        let dir = std::env::temp_dir().join(format!("red_digitizer_writer_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        {
            let mut writer = HDF5Writer::new(&dir, 7, settings(3)).unwrap();
            for counter in 0..5 {
                writer.append_event(&event(counter, &[0, 3], 8)).unwrap();
            }
            assert_eq!(writer.events_in_run(), 5);
            assert!(writer.current_path().ends_with("run7_1.h5"));
            assert!(writer.append_event(&event(9, &[1], 8)).is_err());
        }

        let first = File::open(dir.join("run7_0.h5")).unwrap();
        assert_eq!(first.attr("num_events").unwrap().read_scalar::<u64>().unwrap(), 3);
        assert_eq!(
            first.dataset("timestamps").unwrap().read_raw::<u32>().unwrap(),
            vec![0, 10, 20]
        );
        assert_eq!(
            first.dataset("channels").unwrap().read_raw::<u64>().unwrap(),
            vec![0, 3]
        );

        let second = File::open(dir.join("run7_1.h5")).unwrap();
        assert_eq!(second.attr("num_events").unwrap().read_scalar::<u64>().unwrap(), 2);
        let waveforms = second.dataset("waveforms").unwrap().read_raw::<u16>().unwrap();
        assert_eq!(waveforms.len(), 3 * 2 * 8);
        assert!(waveforms[..16].iter().all(|&s| s == 3));
        assert!(waveforms[16..32].iter().all(|&s| s == 4));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
