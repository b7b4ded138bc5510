// main.rs — q2net-demo: replays a recorded demo through the client network layer

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use q2net_client::cl_demo::DemoReader;
use q2net_client::client::Frame;
use q2net_client::{Client, ClientCallbacks};

#[derive(Parser)]
#[command(name = "q2net-demo")]
#[command(about = "Replay a protocol 34 demo file and report its frames")]
struct Args {
    /// Demo file to replay
    file: PathBuf,

    #[arg(long, default_value_t = 0, help = "Net message tracing level (0-2)")]
    shownet: i32,

    #[arg(long, help = "Enable developer diagnostics")]
    developer: bool,
}

#[derive(Default)]
struct FrameStats {
    frames: usize,
    invalid: usize,
}

impl ClientCallbacks for FrameStats {
    fn print(&mut self, _level: i32, text: &str) {
        log::info!("{}", text.trim_end());
    }

    fn center_print(&mut self, text: &str) {
        log::info!("[center] {}", text.trim_end());
    }

    fn frame_parsed(&mut self, frame: &Frame) {
        self.frames += 1;
        if !frame.valid {
            self.invalid += 1;
            return;
        }
        let origin = frame.playerstate.pmove.origin;
        log::info!(
            "frame {}: {} entities, origin ({:.1} {:.1} {:.1})",
            frame.serverframe,
            frame.num_entities,
            origin[0] as f32 * 0.125,
            origin[1] as f32 * 0.125,
            origin[2] as f32 * 0.125,
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.developer { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let file = File::open(&args.file)
        .with_context(|| format!("couldn't open {}", args.file.display()))?;

    let mut client = Client::new();
    client.cvars.set_value("cl_shownet", args.shownet as f32);
    client.cvars.set_value("developer", if args.developer { 1.0 } else { 0.0 });
    client.start_demo();

    let mut stats = FrameStats::default();
    let mut reader = DemoReader::new(BufReader::new(file));
    let result = replay(&mut client, &mut reader, &mut stats);

    println!(
        "{}: {} messages, {} frames ({} invalid), final state {:?}",
        args.file.display(),
        reader.blocks_read(),
        stats.frames,
        stats.invalid,
        client.cls.state
    );

    result
}

fn replay<R: std::io::Read>(
    client: &mut Client,
    reader: &mut DemoReader<R>,
    stats: &mut FrameStats,
) -> Result<()> {
    while let Some(block) = reader.next_block()? {
        client
            .read_packet(&block, stats)
            .with_context(|| format!("demo message {}", reader.blocks_read()))?;
    }
    Ok(())
}
