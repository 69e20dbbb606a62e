use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use labbrick_lib::units::{db_to_hr, db_to_quarter_db, frequency_units_to_hz, hz_to_frequency_units, quarter_db_to_db};
use labbrick_lib::{Config, DeviceId, Family, Features, LabBrick, ProfileMode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Control Vaunix Lab Brick attenuators and phase shifters.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Use simulated units instead of USB hardware.
    #[arg(long, global = true)]
    test_mode: bool,
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Reply timeout in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected units.
    List,
    /// Show model, limits and capabilities of a unit.
    Info { id: u32 },
    /// Show the status word of a unit.
    Status { id: u32 },
    /// Set the attenuation in dB.
    SetAttenuation {
        id: u32,
        db: f64,
        /// Channel of a multi-channel unit.
        #[arg(long)]
        channel: Option<u8>,
    },
    /// Set the phase angle in degrees.
    SetPhase { id: u32, degrees: f64 },
    /// Set the working frequency in MHz.
    SetFrequency { id: u32, mhz: f64 },
    /// Configure and start a ramp. Levels are dB or degrees.
    Ramp {
        id: u32,
        #[arg(long)]
        start: f64,
        #[arg(long)]
        end: f64,
        #[arg(long)]
        step: f64,
        /// Dwell time per step in ms.
        #[arg(long, default_value_t = 100)]
        dwell: i32,
        #[arg(long)]
        repeat: bool,
        #[arg(long)]
        down: bool,
        #[arg(long)]
        bidirectional: bool,
    },
    /// Load and start a profile. Values are dB or degrees.
    Profile {
        id: u32,
        #[arg(required = true)]
        values: Vec<f64>,
        /// Dwell time per element in ms.
        #[arg(long, default_value_t = 100)]
        dwell: i32,
        /// Idle time between repetitions in ms.
        #[arg(long, default_value_t = 0)]
        idle: i32,
        #[arg(long)]
        repeat: bool,
    },
    /// Write the current settings to non-volatile memory.
    Save { id: u32 },
    /// Print the cached settings as JSON.
    Snapshot { id: u32 },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    if cli.test_mode {
        config = config.with_test_mode(true);
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_response_timeout(Duration::from_millis(ms));
    }
    config.validate()?;
    Ok(config)
}

fn setup_logging(verbosity: &Verbosity<WarnLevel>, config: &Config) -> Result<()> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();
    // Explicit -v/-q wins over the configured library level
    if !verbosity.is_present() {
        filter = filter.add_directive(config.trace.directive().parse()?);
    }

    macro_rules! layer {
        () => {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(config.trace.verbose)
        };
    }
    let (timed, untimed) = if config.trace.verbose {
        (Some(layer!()), None)
    } else {
        (None, Some(layer!().without_time()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(timed)
        .with(untimed)
        .init();
    Ok(())
}

/// Level in the standard accessor units of the family.
fn level_units(family: Family, value: f64) -> i32 {
    match family {
        Family::Attenuator => db_to_quarter_db(value),
        Family::PhaseShifter => value.round() as i32,
    }
}

fn format_level(family: Family, units: i32) -> String {
    match family {
        Family::Attenuator => format!("{:.2} dB", quarter_db_to_db(units)),
        Family::PhaseShifter => format!("{} deg", units),
    }
}

/// Whether levels of this unit go through the 0.05 dB accessors.
async fn uses_hires(lab: &LabBrick, id: DeviceId, family: Family) -> Result<bool> {
    Ok(family == Family::Attenuator && lab.features(id).await?.contains(Features::HAS_HIRES))
}

/// Ramp limits and step in dB or degrees, at the finest resolution the unit takes.
async fn set_ramp_levels(lab: &LabBrick, id: DeviceId, start: f64, end: f64, step: f64) -> Result<()> {
    let family = lab.family(id)?;
    if uses_hires(lab, id, family).await? {
        lab.set_ramp_start_hr(id, db_to_hr(start)).await?;
        lab.set_ramp_end_hr(id, db_to_hr(end)).await?;
        lab.set_ramp_step_hr(id, db_to_hr(step)).await?;
    } else {
        lab.set_ramp_start(id, level_units(family, start)).await?;
        lab.set_ramp_end(id, level_units(family, end)).await?;
        lab.set_ramp_step(id, level_units(family, step)).await?;
    }
    Ok(())
}

/// Open a unit by its 1-based id.
async fn open(lab: &LabBrick, id: u32) -> Result<DeviceId> {
    let id = DeviceId::new(id);
    lab.init_device(id)
        .await
        .with_context(|| format!("Failed to open device {}", id))?;
    Ok(id)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    setup_logging(&cli.verbose, &config)?;
    debug!(?config, "Configuration");

    let lab = LabBrick::new(config)?;
    let found = lab.enumerate().context("Failed to enumerate devices")?;
    info!("{} unit(s) connected", found.len());

    match cli.command {
        Command::List => {
            if found.is_empty() {
                println!("No Lab Brick units found");
            }
            for (id, descriptor) in found {
                println!(
                    "{:>3}  {:<9} #{:<8} {:?}",
                    id.get(),
                    descriptor.model.to_string(),
                    descriptor.serial_number,
                    descriptor.location
                );
            }
        }
        Command::Info { id } => {
            let id = open(&lab, id).await?;
            let family = lab.family(id)?;
            println!("Device {}: {} #{}", id, lab.model_name(id)?, lab.serial_number(id)?);
            println!("  Family:    {}", family);
            println!("  Library:   {}", LabBrick::library_version());
            println!(
                "  Frequency: {:.1} - {:.1} MHz",
                frequency_units_to_hz(lab.min_working_frequency(id).await?) / 1e6,
                frequency_units_to_hz(lab.max_working_frequency(id).await?) / 1e6
            );
            match family {
                Family::Attenuator => {
                    println!(
                        "  Range:     {} - {}",
                        format_level(family, lab.min_attenuation(id).await?),
                        format_level(family, lab.max_attenuation(id).await?)
                    );
                    let features = lab.features(id).await?;
                    if features.contains(Features::HAS_HIRES) {
                        println!("  Min step:  {} x 0.05 dB", lab.min_atten_step_hr(id).await?);
                    } else {
                        println!("  Min step:  {}", format_level(family, lab.min_atten_step(id).await?));
                    }
                    println!("  Features:  {:?}", features);
                    println!("  Level:     {}", format_level(family, lab.attenuation(id).await?));
                }
                Family::PhaseShifter => {
                    println!(
                        "  Range:     {} - {}",
                        format_level(family, lab.min_phase_shift(id).await?),
                        format_level(family, lab.max_phase_shift(id).await?)
                    );
                    println!("  Min step:  {}", format_level(family, lab.min_phase_step(id).await?));
                    println!("  Level:     {}", format_level(family, lab.phase_angle(id).await?));
                }
            }
        }
        Command::Status { id } => {
            let id = open(&lab, id).await?;
            let status = lab.device_status(id).await?;
            println!("Device {} status {:#06x}", id, status.bits());
            println!("  connected:     {}", status.connected());
            println!("  opened:        {}", status.opened());
            println!("  degraded:      {}", status.degraded());
            println!("  rf on:         {}", status.rf_on());
            println!(
                "  ramp active:   {} (up {}, repeat {}, bidirectional {})",
                status.ramp_active(),
                status.ramp_up(),
                status.ramp_repeat(),
                status.ramp_bidirectional()
            );
            println!("  profile active: {}", status.profile_active());
        }
        Command::SetAttenuation { id, db, channel } => {
            let id = open(&lab, id).await?;
            let hires = uses_hires(&lab, id, Family::Attenuator).await?;
            match channel {
                Some(channel) if hires => lab.set_attenuation_hr_on_channel(id, channel, db_to_hr(db)).await?,
                Some(channel) => {
                    lab.set_channel(id, channel).await?;
                    lab.set_attenuation(id, db_to_quarter_db(db)).await?;
                }
                None if hires => lab.set_attenuation_hr(id, db_to_hr(db)).await?,
                None => lab.set_attenuation(id, db_to_quarter_db(db)).await?,
            }
            println!("Attenuation set to {:.2} dB", db);
        }
        Command::SetPhase { id, degrees } => {
            let id = open(&lab, id).await?;
            lab.set_phase_angle(id, degrees.round() as i32).await?;
            println!("Phase angle set to {} deg", lab.phase_angle(id).await?);
        }
        Command::SetFrequency { id, mhz } => {
            let id = open(&lab, id).await?;
            lab.set_working_frequency(id, hz_to_frequency_units(mhz * 1e6)).await?;
            let hz = frequency_units_to_hz(lab.working_frequency(id).await?);
            println!("Working frequency set to {:.1} MHz", hz / 1e6);
        }
        Command::Ramp {
            id,
            start,
            end,
            step,
            dwell,
            repeat,
            down,
            bidirectional,
        } => {
            let id = open(&lab, id).await?;
            set_ramp_levels(&lab, id, start, end, step).await?;
            lab.set_dwell_time(id, dwell).await?;
            lab.set_ramp_direction(id, !down).await?;
            lab.set_ramp_mode(id, repeat).await?;
            if bidirectional {
                lab.set_ramp_bidirectional(id, true).await?;
            }
            lab.start_ramp(id, true).await?;
            println!("Ramp started on device {}", id);
        }
        Command::Profile {
            id,
            values,
            dwell,
            idle,
            repeat,
        } => {
            let id = open(&lab, id).await?;
            let family = lab.family(id)?;
            if values.len() > u16::MAX as usize {
                bail!("Too many profile values: {}", values.len());
            }
            lab.set_profile_count(id, values.len() as i32).await?;
            let hires = uses_hires(&lab, id, family).await?;
            for (index, value) in values.iter().enumerate() {
                let written = if hires {
                    lab.set_profile_element_hr(id, index as u16, db_to_hr(*value)).await
                } else {
                    lab.set_profile_element(id, index as u16, level_units(family, *value))
                        .await
                };
                written.with_context(|| format!("Failed to write profile element {}", index))?;
            }
            lab.set_profile_dwell_time(id, dwell).await?;
            lab.set_profile_idle_time(id, idle).await?;
            let mode = if repeat { ProfileMode::Repeat } else { ProfileMode::Once };
            lab.start_profile(id, mode).await?;
            println!("Profile of {} element(s) started on device {}", values.len(), id);
        }
        Command::Save { id } => {
            let id = open(&lab, id).await?;
            lab.save_settings(id).await?;
            println!("Settings saved on device {}", id);
        }
        Command::Snapshot { id } => {
            let id = open(&lab, id).await?;
            let snapshot = lab.snapshot(id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}
