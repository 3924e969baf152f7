//! Crossbar controller simulator frontend.
//!
//! Provides two execution modes:
//!
//! - **Headless mode** (default): runs each transaction given on the command
//!   line through a bit-level SPI host, waits for the controller to become
//!   ready and prints the response bytes and status lines.
//! - **Step mode** (`--step`): interactive tick-level stepping with register
//!   dumps, checkpoints and ad-hoc transactions.
//!
//! `--vcd <file>` writes a waveform of the whole session.
//!
//! ```text
//! xbar-sim --prog-en --col-sense 5 "05 00" "03 02 01" "07 00" "00"
//! ```

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};
use xbar_core::stimulus::parse_hex_bytes;
use xbar_core::{Controller, ControllerConfig, SpiHost, CS_SYNC_STAGES, SCK_SYNC_STAGES};

/// Default number of ticks to wait for ready after a transaction
const WAIT_TICKS: u32 = 70_000;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Transactions to run, each a string of hex bytes ("03 42 02")
    transactions: Vec<String>,

    /// Assert the programming-enable interlock
    #[arg(long)]
    prog_en: bool,

    /// Column sense value (0-15, decimal or 0x-prefixed hex)
    #[arg(long, default_value = "0", value_parser = parse_col_sense)]
    col_sense: u8,

    /// Serial clock synchronizer stages (2-8)
    #[arg(long, default_value_t = SCK_SYNC_STAGES)]
    sck_stages: u8,

    /// Chip-select synchronizer stages (2-8)
    #[arg(long, default_value_t = CS_SYNC_STAGES)]
    cs_stages: u8,

    /// Host clock half period in controller ticks
    #[arg(long, default_value_t = 4)]
    half_period: u32,

    /// Maximum ticks to wait for ready after each transaction
    #[arg(long, default_value_t = WAIT_TICKS)]
    wait: u32,

    /// Write a VCD waveform of the session
    #[arg(long)]
    vcd: Option<PathBuf>,

    /// Maximum ticks kept in the waveform
    #[arg(long, default_value_t = 1_000_000)]
    vcd_limit: usize,

    /// Interactive tick-step mode
    #[arg(long)]
    step: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long)]
    debug: bool,
}

fn parse_col_sense(s: &str) -> Result<u8, String> {
    let v = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    }
    .map_err(|e| format!("invalid column value {:?}: {}", s, e))?;
    if v > 0x0F {
        return Err(format!("column sense has 4 lines, {} does not fit", v));
    }
    Ok(v)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = ControllerConfig::default().with_sync_stages(args.sck_stages, args.cs_stages);
    info!(
        "sync stages: sck={} cs={}  pulse_width={} form_width={} settle={}",
        config.sck_sync_stages, config.cs_sync_stages,
        config.pulse_width, config.form_width, config.read_settle_ticks
    );
    let min_half = SpiHost::min_half_period(&config);
    if args.half_period < min_half {
        warn!(
            "half period {} is below {} ticks for these synchronizers, responses will be wrong",
            args.half_period, min_half
        );
    }
    let mut ctl = Controller::new(config);
    let mut host = SpiHost::new().with_half_period(args.half_period);
    host.set_prog_en(args.prog_en);
    host.set_col_sense(args.col_sense);
    if args.vcd.is_some() {
        host.start_recording(args.vcd_limit);
    }

    if args.step {
        run_step_mode(&mut ctl, &mut host)?;
    } else {
        run_headless(&args, &mut ctl, &mut host)?;
    }

    if let Some(path) = &args.vcd {
        if let Some(rec) = host.take_recording() {
            if rec.dropped > 0 {
                warn!("waveform limit reached, {} ticks not recorded", rec.dropped);
            }
            std::fs::write(path, rec.to_vcd())?;
            info!("wrote {} ticks to {}", rec.len(), path.display());
        }
    }
    Ok(())
}

fn format_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

fn print_status(ctl: &Controller) {
    let o = ctl.outputs();
    println!("  ready={} error={} prog_done={} row={:08b}  state={:?}  tick={}",
        o.ready as u8, o.error as u8, o.prog_done as u8, o.row_drive, ctl.state(), ctl.tick);
}

// ─── Headless Mode ──────────────────────────────────────────────────────────

fn run_headless(args: &Args, ctl: &mut Controller, host: &mut SpiHost) -> xbar_core::Result<()> {
    if args.transactions.is_empty() {
        warn!("no transactions given");
    }
    for (n, text) in args.transactions.iter().enumerate() {
        let bytes = parse_hex_bytes(text)?;
        let rsp = host.transaction(ctl, &bytes);
        if !host.wait_ready(ctl, args.wait) {
            warn!("transaction {} still busy after {} ticks", n + 1, args.wait);
        }
        println!("[{}] {} -> {}", n + 1, format_bytes(&bytes), format_bytes(&rsp));
        print_status(ctl);
    }
    Ok(())
}

// ─── Step Mode ──────────────────────────────────────────────────────────────

fn run_step_mode(ctl: &mut Controller, host: &mut SpiHost) -> xbar_core::Result<()> {
    println!("Step mode: Enter=tick, N<enter>=N ticks, d=dump, t HEX..=transaction,");
    println!("           p 0|1=prog_en, c N=col sense, s=checkpoint, l=restore, q=quit");
    println!("{}", ctl.dump_regs());

    let stdin = std::io::stdin();
    let mut checkpoint: Option<Vec<u8>> = None;
    loop {
        let mut line = String::new();
        print!("step> ");
        let _ = std::io::stdout().flush();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let cmd = line.trim();
        let (word, rest) = cmd.split_once(' ').unwrap_or((cmd, ""));
        match word {
            "q" | "quit" => break,
            "d" | "dump" => { println!("{}", ctl.dump_regs()); continue; }
            "t" => {
                match parse_hex_bytes(rest) {
                    Ok(bytes) => {
                        let rsp = host.transaction(ctl, &bytes);
                        println!("  {} -> {}", format_bytes(&bytes), format_bytes(&rsp));
                        print_status(ctl);
                    }
                    Err(e) => println!("  {}", e),
                }
                continue;
            }
            "p" => { host.set_prog_en(rest.trim() == "1"); continue; }
            "c" => {
                match parse_col_sense(rest.trim()) {
                    Ok(v) => host.set_col_sense(v),
                    Err(e) => println!("  {}", e),
                }
                continue;
            }
            "s" => {
                let state = ctl.save_state()?;
                println!("  checkpoint at tick {} ({} bytes)", ctl.tick, state.len());
                checkpoint = Some(state);
                continue;
            }
            "l" => {
                match &checkpoint {
                    Some(state) => {
                        ctl.load_state(state)?;
                        println!("{}", ctl.dump_regs());
                    }
                    None => println!("  no checkpoint"),
                }
                continue;
            }
            _ => {}
        }
        let n: u32 = cmd.parse().unwrap_or(1);
        host.run(ctl, n);
        println!("{}", ctl.dump_regs());
    }
    println!("Total: {} ticks, {} transactions", ctl.tick, host.transactions);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_col_sense() {
        assert_eq!(parse_col_sense("5"), Ok(5));
        assert_eq!(parse_col_sense("0x0A"), Ok(10));
        assert!(parse_col_sense("16").is_err());
        assert!(parse_col_sense("x").is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(&[0x03, 0x42, 0x00]), "03 42 00");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["xbar-sim", "--prog-en", "--col-sense", "0x5", "05 00", "07 00"]);
        assert!(args.prog_en);
        assert_eq!(args.col_sense, 5);
        assert_eq!(args.transactions, vec!["05 00".to_string(), "07 00".to_string()]);
        assert_eq!(args.sck_stages, 3);
        let config = ControllerConfig::default().with_sync_stages(args.sck_stages, args.cs_stages);
        assert!(args.half_period >= SpiHost::min_half_period(&config));
    }
}
