use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use confique::Config;
use crossbeam_channel::{select, tick, unbounded, Receiver};
use log::{info, warn};
use red_digitizer::{
    config::{group_configs, RunSettings},
    utils::{create_camp_dir, next_run_number},
    CaenApi, Conf, ConnectionParams, ConnectionRegistry, Counter, Digitizer, DigitizerModel,
    LogLogger, RecordedEvent, SessionOptions, SimulatedLibrary,
};
use simplelog::{ColorChoice, CombinedLogger, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use time::OffsetDateTime;

#[derive(Parser, Debug)]
#[command(version, about = "Acquire waveforms from a CAEN digitizer")]
struct Args {
    /// TOML run configuration
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Acquire from a simulated board pulsed by an external trigger every poll
    #[arg(long)]
    simulate: bool,

    /// Number of runs, overrides `run.runs`
    #[arg(short, long)]
    runs: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Conf::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let model: DigitizerModel = config.connection.model.parse()?;
    let camp_dir = create_camp_dir(&config.run.output_dir, config.run.campaign_num)?;
    init_logging(&camp_dir)?;

    let runs = args.runs.unwrap_or(config.run.runs);
    if args.simulate {
        let sim = SimulatedLibrary::new(model);
        let pulser = sim.clone();
        return acquire(sim, model, &config, &camp_dir, runs, move || {
            pulser.fire_external_trigger()
        });
    }

    #[cfg(feature = "caen-sdk")]
    return acquire(
        red_digitizer::CaenDigitizerLib::new(),
        model,
        &config,
        &camp_dir,
        runs,
        || (),
    );

    #[cfg(not(feature = "caen-sdk"))]
    bail!("built without the caen-sdk feature, only --simulate is available");
}

fn init_logging(camp_dir: &Path) -> Result<()> {
    let started = OffsetDateTime::now_utc();
    let log_file = camp_dir.join(format!("daq_{}.log", started.unix_timestamp()));
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            simplelog::Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(
            LevelFilter::Debug,
            simplelog::Config::default(),
            File::create(&log_file)?,
        ),
    ])?;
    info!("Logging to {} from {started}", log_file.display());
    Ok(())
}

fn acquire<A: CaenApi>(
    api: A,
    model: DigitizerModel,
    config: &Conf,
    camp_dir: &Path,
    runs: usize,
    mut on_poll: impl FnMut(),
) -> Result<()> {
    let conn = &config.connection;
    let params = ConnectionParams {
        connection_type: conn.connection_type,
        link_num: conn.link_num,
        conet_node: conn.conet_node,
        vme_base_address: conn.vme_base_address,
    };
    let options = SessionOptions {
        event_buffer_size: config.run.event_buffer_size,
    };
    let mut dgtz = Digitizer::connect_with_options(
        api,
        Arc::new(ConnectionRegistry::new()),
        Arc::new(LogLogger),
        model,
        params,
        options,
    );
    if !dgtz.is_connected() {
        bail!("could not connect to the {model} ({params:?})");
    }

    dgtz.setup(&config.acquisition.to_global_config(), &group_configs(&config.groups)?)?;
    red_digitizer::log_all(&dgtz);

    for _ in 0..runs {
        let run_num = next_run_number(camp_dir)?;
        run(&mut dgtz, config, camp_dir, run_num, &mut on_poll)?;
    }
    Ok(())
}

fn run<A: CaenApi>(
    dgtz: &mut Digitizer<A>,
    config: &Conf,
    camp_dir: &Path,
    run_num: usize,
    on_poll: &mut impl FnMut(),
) -> Result<()> {
    let settings = &config.run;
    let (tx_events, rx_events) = unbounded();
    let writer = spawn_writer(rx_events, dgtz, config, camp_dir, run_num)?;

    dgtz.enable_acquisition()?;
    info!("Run {run_num} of campaign {} started", settings.campaign_num);

    let ticker = tick(Duration::from_secs(1));
    let poll = tick(Duration::from_millis(settings.poll_interval_ms.max(1)));
    let run_duration = Duration::from_secs(settings.run_duration);
    let mut counter = Counter::new();
    let t_begin = Instant::now();

    while t_begin.elapsed() < run_duration {
        select! {
            recv(poll) -> _ => {
                on_poll();
                for event in poll_board(dgtz, settings)? {
                    counter.increment(event.size());
                    tx_events
                        .send(event)
                        .map_err(|_| anyhow!("writer thread stopped"))?;
                }
            }
            recv(ticker) -> _ => {
                info!(
                    "Run {run_num}: {} s, {} events, {:.1} events/s, {:.2} MB/s, writer backlog {}",
                    t_begin.elapsed().as_secs(),
                    counter.n_events,
                    counter.event_rate(),
                    counter.rate(),
                    tx_events.len()
                );
            }
        }
    }

    dgtz.disable_acquisition()?;
    drop(tx_events);
    writer
        .join()
        .map_err(|_| anyhow!("writer thread panicked"))??;
    info!(
        "Run {run_num} finished: {} events, {:.2} MB/s on average",
        counter.n_events,
        counter.average_rate()
    );
    Ok(())
}

/// Events decoded from one readout, empty when too few were waiting.
fn poll_board<A: CaenApi>(dgtz: &mut Digitizer<A>, settings: &RunSettings) -> Result<Vec<RecordedEvent>> {
    if settings.software_trigger {
        dgtz.software_trigger()?;
    }
    if !dgtz.retrieve_data_until_n_events(settings.events_per_read)? {
        return Ok(Vec::new());
    }
    let retrieved = dgtz.number_of_events() as usize;
    if retrieved == 0 {
        return Ok(Vec::new());
    }

    dgtz.decode_events()?;
    let pool = dgtz.waveforms().len();
    if retrieved > pool {
        warn!("Dropped {} events that did not fit the event pool", retrieved - pool);
    }
    Ok(dgtz
        .waveforms()
        .iter()
        .take(retrieved)
        .map(|wf| RecordedEvent::from(&*wf.read()))
        .collect())
}

#[cfg(feature = "hdf5")]
fn spawn_writer<A: CaenApi>(
    rx: Receiver<RecordedEvent>,
    dgtz: &Digitizer<A>,
    config: &Conf,
    camp_dir: &Path,
    run_num: usize,
) -> Result<JoinHandle<Result<()>>> {
    use red_digitizer::{waveform::enabled_channels, HDF5Writer, WriterSettings};

    let settings = WriterSettings {
        channels: enabled_channels(dgtz.model_constants(), dgtz.group_configs()),
        n_samples: dgtz.global_config().record_length as usize,
        max_events_per_file: config.run.max_events_per_file,
        buffer_capacity: config.run.event_buffer_size,
        compression_level: config.run.compression_level,
        blosc_threads: config.run.blosc_threads,
    };
    let camp_dir = camp_dir.to_path_buf();
    Ok(thread::spawn(move || -> Result<()> {
        let mut writer = HDF5Writer::new(camp_dir, run_num, settings)?;
        info!("Writing run {run_num} to {}", writer.current_path().display());
        for event in rx {
            writer.append_event(&event)?;
        }
        writer.flush()
    }))
}

#[cfg(not(feature = "hdf5"))]
fn spawn_writer<A: CaenApi>(
    rx: Receiver<RecordedEvent>,
    _dgtz: &Digitizer<A>,
    _config: &Conf,
    _camp_dir: &Path,
    run_num: usize,
) -> Result<JoinHandle<Result<()>>> {
    warn!("Built without the hdf5 feature, run {run_num} is not saved");
    Ok(thread::spawn(move || -> Result<()> {
        let discarded = rx.iter().count();
        log::debug!("Discarded {discarded} events of run {run_num}");
        Ok(())
    }))
}
