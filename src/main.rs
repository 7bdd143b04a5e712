use repcap::bitmap::RoutingBitmap;
use repcap::context::ReplayContext;
use repcap::error::{Outcome, Result};
use repcap::rate::SpeedMode;
use repcap::structs::{Intf, StepAction};
use repcap::ui;

mod cmd;

use clap::Parser;
use indicatif::HumanBytes;
use std::io::BufRead;
use std::process;
use std::thread;
use std::time::Duration;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cmd::Args::parse();

    match run(args) {
        Ok(Outcome::Completed) => {}
        Ok(Outcome::Aborted) => log::warn!("replay was aborted before completion"),
        Err(e) => {
            log::error!("{e}");
            process::exit(1);
        }
    }
}

fn run(args: cmd::Args) -> Result<Outcome> {
    let mut ctx = ReplayContext::new();

    ctx.set_loop(args.loop_count)?;
    ctx.set_mtu(args.mtu)?;
    ctx.set_sleep_accel(args.sleep_accel);
    ctx.set_file_cache(args.enable_file_cache);
    if args.pktlen {
        let _ = ctx.set_use_pkthdr_len(true)?;
    }
    if let Some(limit) = args.limit {
        ctx.set_limit_send(limit as i64)?;
    }
    if let Some(timer) = args.timer {
        ctx.set_timer(timer.into())?;
    }
    ctx.set_speed(speed_mode(&args))?;

    for file in &args.files {
        ctx.add_source_file(file)?;
    }
    if let Some(path) = &args.bitmap {
        ctx.set_routing_bitmap(RoutingBitmap::from_file(path)?)?;
    }

    if args.oneatatime {
        ctx.set_manual_callback(Box::new(|snapshot| {
            eprint!(
                "** {} packets sent; Enter to send the next one, q to quit: ",
                snapshot.pkts_sent
            );
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => StepAction::Stop,
                Ok(_) if line.trim().eq_ignore_ascii_case("q") => StepAction::Stop,
                Ok(_) => StepAction::Continue,
            }
        }))?;
    }

    ctx.set_interface(Intf::A, &args.intf1)?;
    if let Some(name) = &args.intf2 {
        ctx.set_interface(Intf::B, name)?;
    }

    // Ctrl-C requests a cooperative abort; a second Ctrl-C kills us
    let control = ctx.control();
    ctrlc::set_handler(move || {
        if control.aborted() {
            process::exit(1);
        }
        log::warn!("interrupt: stopping after the current packet");
        control.abort();
    })
    .expect("cannot install the interrupt handler");

    let monitor = args.stats.map(|secs| {
        let stats = ctx.stats();
        let control = ctx.control();
        thread::Builder::new()
            .name("monitor".into())
            .spawn(move || ui::run(stats, control, Duration::from_secs(secs.max(1))))
            .expect("cannot spawn the monitor thread")
    });

    let outcome = ctx.replay(None)?;

    if let Some(handle) = monitor {
        let _ = handle.join();
    }
    summarize(&ctx);
    ctx.close();
    Ok(outcome)
}

fn speed_mode(args: &cmd::Args) -> SpeedMode {
    if args.topspeed {
        SpeedMode::Topspeed
    } else if args.oneatatime {
        SpeedMode::Oneatatime
    } else if let Some(rate) = args.pps {
        SpeedMode::Pps {
            rate,
            burst: args.pps_multi,
        }
    } else if let Some(rate) = args.mbps {
        SpeedMode::Mbps(rate)
    } else {
        SpeedMode::Multiplier(args.multiplier.unwrap_or(1.0))
    }
}

fn summarize(ctx: &ReplayContext) {
    let snap = ctx.stats().snapshot();
    let secs = snap.elapsed().as_secs_f64().max(1e-6);
    log::info!(
        "Actual: {} packets ({}) sent in {:.2} seconds",
        snap.pkts_sent,
        HumanBytes(snap.bytes_sent),
        secs,
    );
    log::info!(
        "Rated: {:.1} Bps, {:.3} Mbps, {:.1} pps",
        snap.bytes_sent as f64 / secs,
        snap.bytes_sent as f64 * 8.0 / secs / 1e6,
        snap.pkts_sent as f64 / secs,
    );
    if snap.failed > 0 || snap.skipped > 0 {
        log::info!("{} failed sends, {} packets skipped", snap.failed, snap.skipped);
    }
}
