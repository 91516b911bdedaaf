use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use nightwatch::config::ReceiverConfig;
use nightwatch::decoders::Decoders;
use nightwatch::fft::FftStream;
use nightwatch::predict;
use nightwatch::recorder::Recorder;
use nightwatch::scheduler::{FftSignalCheck, Scheduler};
use nightwatch::sdr::{Arbiter, SharedGain};
use nightwatch::sstv::SstvScanner;
use nightwatch::state::StateBus;
use nightwatch::store::Store;
use nightwatch::web::{run_server, AppState};

#[derive(Parser)]
#[command(name = "nightwatch")]
#[command(about = "Autonomous satellite ground station")]
struct Cli {
    /// Station configuration file
    #[arg(short, long, default_value = "nightwatch.yaml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture orchestrator and the web interface
    Serve,
    /// Predict and print upcoming passes
    Passes {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Decode an SSTV recording into a PNG
    Decode {
        wav: String,
        /// Output directory (defaults to the configured images dir)
        #[arg(short, long)]
        out_dir: Option<String>,
    },
    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ReceiverConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config_invalid: {}", e);
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.log_level),
    )
    .init();

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Passes { hours } => passes(config, hours),
        Commands::Decode { wav, out_dir } => decode(config, &wav, out_dir.as_deref()),
        Commands::Validate => {
            println!(
                "Configuration is valid ({} satellites, {} enabled)",
                config.satellites.len(),
                config.satellites.iter().filter(|s| s.enabled).count()
            );
            ExitCode::SUCCESS
        }
    }
}

async fn serve(config: ReceiverConfig) -> ExitCode {
    let bus = StateBus::new();
    let arbiter = Arbiter::new();
    let gain = SharedGain::new(config.sdr.gain);
    let fft = FftStream::new(arbiter.clone(), bus.clone(), config.clone(), gain.clone());
    let store = Arc::new(Store::new(config.paths.captures_dir.clone()));
    let scanner = Arc::new(SstvScanner::new(config.clone(), bus.clone()));

    let scheduler = Arc::new(Scheduler::new(
        config.clone(),
        bus.clone(),
        fft.clone(),
        scanner,
        Arc::new(Recorder::new(arbiter.clone(), config.clone(), gain)),
        Arc::new(Decoders::new(config.clone())),
        Arc::new(FftSignalCheck::new(fft.clone(), config.clone())),
        store.clone(),
    ));

    bus.set_sdr_connected(true);

    // The capture loop runs beside the web server: predict a day of
    // passes, work through them, repeat (or exit in one-shot mode).
    let capture_loop = {
        let scheduler = scheduler.clone();
        let bus = bus.clone();
        let config = config.clone();
        tokio::spawn(async move {
            loop {
                let passes = match predict::upcoming_passes(&config, chrono::Utc::now(), 24) {
                    Ok(passes) => passes,
                    Err(e) => {
                        log::error!("pass prediction failed: {}", e);
                        Vec::new()
                    }
                };
                log::info!("predicted {} upcoming passes", passes.len());
                bus.set_upcoming_passes(passes.clone());

                if !passes.is_empty() {
                    let results = scheduler.run_scheduler(passes).await;
                    log::info!(
                        "pass run finished: {}/{} successful",
                        results.iter().filter(|r| r.success).count(),
                        results.len()
                    );
                }

                if !config.service_mode {
                    log::info!("one-shot mode, capture loop done");
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            }
        })
    };

    let state = AppState {
        config: Arc::new(config.clone()),
        bus,
        fft,
        scheduler: scheduler.clone(),
        store,
    };

    let result = tokio::select! {
        result = run_server(state, &config.web.bind) => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutting down");
            scheduler.shutdown();
            capture_loop.abort();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn passes(config: ReceiverConfig, hours: i64) -> ExitCode {
    match predict::upcoming_passes(&config, chrono::Utc::now(), hours) {
        Ok(passes) => {
            println!("{} passes in the next {} h", passes.len(), hours);
            for pass in passes {
                println!(
                    "  {:<20} AOS {}  max el {:>5.1}°  {:>4} s",
                    pass.satellite.name,
                    pass.aos.format("%Y-%m-%d %H:%M:%SZ"),
                    pass.max_elevation_deg,
                    pass.duration_seconds
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("prediction failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn decode(config: ReceiverConfig, wav: &str, out_dir: Option<&str>) -> ExitCode {
    let out_dir = out_dir
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| config.paths.images_dir.clone());

    match nightwatch::sstv::decode_recording(std::path::Path::new(wav), &out_dir) {
        Ok(outcome) => {
            let d = &outcome.diagnostics;
            println!("{}", outcome.image_path.display());
            println!(
                "  mode {}  VIS 0x{:02X}  offset {:+.1} Hz  {} of {} lines",
                d.mode, d.vis_code, d.frequency_offset_hz, d.lines_decoded, d.lines_expected
            );
            println!(
                "  brightness {:.0}  verdict {:?}  warnings {:?}",
                d.brightness, d.verdict, d.warnings
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("decode failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
