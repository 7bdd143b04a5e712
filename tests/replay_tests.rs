mod common;

use common::{frame, markers, temp_path, write_pcap, MockSender};
use repcap::bitmap::RoutingBitmap;
use repcap::context::ReplayContext;
use repcap::error::Outcome;
use repcap::rate::SpeedMode;
use repcap::structs::{Intf, StepAction};
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn context_with_sender(file: &std::path::Path) -> (ReplayContext, common::Tape) {
    let mut ctx = ReplayContext::new();
    ctx.add_source_file(file).unwrap();
    let (sender, tape) = MockSender::new("mock0");
    ctx.set_sender(Intf::A, Box::new(sender)).unwrap();
    (ctx, tape)
}

#[test]
fn multiplier_preserves_capture_pacing() {
    let pcap = temp_path("multiplier.pcap");
    write_pcap(
        &pcap,
        &[
            (0, frame(0, 60)),
            (200_000, frame(1, 60)),
            (300_000, frame(2, 60)),
        ],
    );
    let (mut ctx, tape) = context_with_sender(&pcap);
    ctx.set_speed(SpeedMode::Multiplier(1.0)).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(ctx.stats().pkts_sent(), 3);

    let sent = tape.lock().unwrap();
    let gap1 = sent[1].at - sent[0].at;
    let gap2 = sent[2].at - sent[1].at;
    assert!(gap1 >= Duration::from_millis(180), "gap1 was {gap1:?}");
    assert!(gap2 >= Duration::from_millis(80), "gap2 was {gap2:?}");
    drop(sent);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn topspeed_with_limit_stops_early() {
    let pcap = temp_path("limit.pcap");
    let packets: Vec<(u64, Vec<u8>)> = (0..1000).map(|i| (i, frame(0, 60))).collect();
    write_pcap(&pcap, &packets);
    let (mut ctx, tape) = context_with_sender(&pcap);
    ctx.set_speed(SpeedMode::Topspeed).unwrap();
    ctx.set_limit_send(100).unwrap();

    let started = Instant::now();
    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(ctx.stats().pkts_sent(), 100);
    assert_eq!(tape.lock().unwrap().len(), 100);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn limit_of_zero_sends_nothing() {
    let pcap = temp_path("limit0.pcap");
    write_pcap(&pcap, &[(0, frame(0, 60))]);
    let (mut ctx, _tape) = context_with_sender(&pcap);
    ctx.set_limit_send(0).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(ctx.stats().pkts_sent(), 0);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn empty_source_completes_as_noop() {
    let pcap = temp_path("empty.pcap");
    write_pcap(&pcap, &[]);
    let (mut ctx, _tape) = context_with_sender(&pcap);

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(ctx.stats().pkts_sent(), 0);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn bitmap_routes_between_interfaces() {
    let pcap = temp_path("routing.pcap");
    write_pcap(
        &pcap,
        &[
            (0, frame(0, 60)),
            (1, frame(1, 60)),
            (2, frame(2, 60)),
            (3, frame(3, 60)),
        ],
    );
    let mut ctx = ReplayContext::new();
    ctx.add_source_file(&pcap).unwrap();
    ctx.set_routing_bitmap(RoutingBitmap::new(vec![0b1010], 4, "").unwrap())
        .unwrap();
    let (a, tape_a) = MockSender::new("mock-a");
    let (b, tape_b) = MockSender::new("mock-b");
    ctx.set_sender(Intf::A, Box::new(a)).unwrap();
    ctx.set_sender(Intf::B, Box::new(b)).unwrap();
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(markers(&tape_a), vec![0, 2]);
    assert_eq!(markers(&tape_b), vec![1, 3]);
    assert_eq!(ctx.stats().pkts_sent(), 4);
    assert_eq!(ctx.stats().skipped(), 0);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn bitmap_without_secondary_interface_skips() {
    let pcap = temp_path("skip.pcap");
    write_pcap(
        &pcap,
        &[
            (0, frame(0, 60)),
            (1, frame(1, 60)),
            (2, frame(2, 60)),
            (3, frame(3, 60)),
        ],
    );
    let (mut ctx, tape) = context_with_sender(&pcap);
    ctx.set_routing_bitmap(RoutingBitmap::new(vec![0b0110], 4, "").unwrap())
        .unwrap();
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(markers(&tape), vec![0, 3]);
    assert_eq!(ctx.stats().pkts_sent(), 2);
    assert_eq!(ctx.stats().skipped(), 2);
    assert_eq!(ctx.stats().failed(), 0);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn abort_ends_an_infinite_replay() {
    let pcap = temp_path("abort.pcap");
    let packets: Vec<(u64, Vec<u8>)> = (0..10).map(|i| (i, frame(0, 60))).collect();
    write_pcap(&pcap, &packets);
    let (mut ctx, _tape) = context_with_sender(&pcap);
    ctx.set_loop(0).unwrap();
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    let control = ctx.control();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        control.abort();
    });

    let started = Instant::now();
    assert_eq!(ctx.replay(None).unwrap(), Outcome::Aborted);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!ctx.control().is_running());
    assert!(ctx.stats().pkts_sent() > 0);
    aborter.join().unwrap();
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn suspend_pauses_without_reordering() {
    let pcap = temp_path("suspend.pcap");
    write_pcap(
        &pcap,
        &[(0, frame(0, 60)), (1, frame(1, 60)), (2, frame(2, 60))],
    );
    let (mut ctx, tape) = context_with_sender(&pcap);
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    let control = ctx.control();
    control.suspend();
    let resumer = {
        let control = ctx.control();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            assert!(control.is_suspended());
            assert!(control.is_running());
            control.restart();
        })
    };

    let started = Instant::now();
    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert!(started.elapsed() >= Duration::from_millis(140));
    assert_eq!(markers(&tape), vec![0, 1, 2]);
    resumer.join().unwrap();
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn file_cache_serves_later_loops_from_memory() {
    let pcap = temp_path("cache.pcap");
    write_pcap(
        &pcap,
        &[(0, frame(7, 60)), (1, frame(8, 60)), (2, frame(9, 60))],
    );
    let (mut ctx, tape) = context_with_sender(&pcap);
    ctx.set_loop(3).unwrap();
    ctx.set_file_cache(true);
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(ctx.stats().pkts_sent(), 9);
    assert_eq!(markers(&tape), vec![7, 8, 9, 7, 8, 9, 7, 8, 9]);

    // once filled, the cache outlives the file entirely
    fs::remove_file(&pcap).unwrap();
    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(ctx.stats().pkts_sent(), 18);
    assert_eq!(markers(&tape).len(), 18);
}

#[test]
fn single_pass_never_allocates_the_cache() {
    let pcap = temp_path("nocache.pcap");
    write_pcap(&pcap, &[(0, frame(0, 60))]);
    let (mut ctx, _tape) = context_with_sender(&pcap);
    ctx.set_file_cache(true);
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert!(ctx.last_warning().unwrap().contains("single pass"));

    // nothing was cached, so a second replay has to re-open the file
    fs::remove_file(&pcap).unwrap();
    assert!(ctx.replay(None).is_err());
}

#[test]
fn oneatatime_callback_can_stop_the_replay() {
    let pcap = temp_path("oneatatime.pcap");
    let packets: Vec<(u64, Vec<u8>)> = (0..5).map(|i| (i, frame(i as u8, 60))).collect();
    write_pcap(&pcap, &packets);
    let (mut ctx, tape) = context_with_sender(&pcap);
    ctx.set_speed(SpeedMode::Oneatatime).unwrap();

    let calls = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&calls);
    ctx.set_manual_callback(Box::new(move |snapshot| {
        seen.fetch_add(1, Ordering::Relaxed);
        if snapshot.pkts_sent >= 2 {
            StepAction::Stop
        } else {
            StepAction::Continue
        }
    }))
    .unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(ctx.stats().pkts_sent(), 2);
    assert_eq!(calls.load(Ordering::Relaxed), 2);
    assert_eq!(markers(&tape), vec![0, 1]);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn pps_bursts_pace_the_replay() {
    let pcap = temp_path("pps.pcap");
    let packets: Vec<(u64, Vec<u8>)> = (0..4).map(|i| (i, frame(0, 60))).collect();
    write_pcap(&pcap, &packets);
    let (mut ctx, _tape) = context_with_sender(&pcap);
    ctx.set_speed(SpeedMode::Pps {
        rate: 20.0,
        burst: 2,
    })
    .unwrap();

    let started = Instant::now();
    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    // ceil(4/2) - 1 = 1 inter-burst gap of 2/20s
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert_eq!(ctx.stats().pkts_sent(), 4);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn mbps_zero_is_as_fast_as_topspeed() {
    let pcap = temp_path("mbps0.pcap");
    let packets: Vec<(u64, Vec<u8>)> = (0..200).map(|i| (i * 1_000_000, frame(0, 60))).collect();
    write_pcap(&pcap, &packets);
    let (mut ctx, _tape) = context_with_sender(&pcap);
    ctx.set_speed(SpeedMode::Mbps(0.0)).unwrap();

    let started = Instant::now();
    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    // capture spans 200 seconds; unbounded replay ignores that entirely
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(ctx.stats().pkts_sent(), 200);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn oversized_packets_count_as_failed() {
    let pcap = temp_path("mtu.pcap");
    write_pcap(
        &pcap,
        &[(0, frame(0, 60)), (1, frame(1, 200)), (2, frame(2, 60))],
    );
    let (mut ctx, tape) = context_with_sender(&pcap);
    ctx.set_mtu(100).unwrap();
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(ctx.stats().pkts_sent(), 2);
    assert_eq!(ctx.stats().failed(), 1);
    assert_eq!(markers(&tape), vec![0, 2]);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn send_failures_do_not_end_the_replay() {
    let pcap = temp_path("sendfail.pcap");
    let packets: Vec<(u64, Vec<u8>)> = (0..6).map(|i| (i, frame(i as u8, 60))).collect();
    write_pcap(&pcap, &packets);
    let mut ctx = ReplayContext::new();
    ctx.add_source_file(&pcap).unwrap();
    let (sender, tape) = MockSender::new("flaky");
    ctx.set_sender(Intf::A, Box::new(sender.failing_every(3)))
        .unwrap();
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(ctx.stats().pkts_sent(), 4);
    assert_eq!(ctx.stats().failed(), 2);
    assert_eq!(markers(&tape), vec![0, 1, 3, 4]);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn accounting_identity_holds_at_completion() {
    let pcap = temp_path("identity.pcap");
    let packets: Vec<(u64, Vec<u8>)> = (0..8).map(|i| (i, frame(i as u8, 60))).collect();
    write_pcap(&pcap, &packets);
    let (mut ctx, _tape) = context_with_sender(&pcap);
    // bits 1 at positions 1 and 5, with no secondary bound
    ctx.set_routing_bitmap(RoutingBitmap::new(vec![0b0010_0010], 8, "").unwrap())
        .unwrap();
    ctx.set_loop(2).unwrap();
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    let snap = ctx.stats().snapshot();
    assert_eq!(snap.pkts_sent + snap.failed + snap.skipped, 8 * 2);
    assert_eq!(snap.skipped, 2 * 2);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn single_packet_source_sends_once_per_loop() {
    let pcap = temp_path("single.pcap");
    write_pcap(&pcap, &[(0, frame(5, 60))]);
    let (mut ctx, tape) = context_with_sender(&pcap);
    ctx.set_loop(3).unwrap();
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(markers(&tape), vec![5, 5, 5]);
    fs::remove_file(&pcap).unwrap();
}

#[test]
fn sources_replay_in_order_and_by_index() {
    let first = temp_path("multi-a.pcap");
    let second = temp_path("multi-b.pcap");
    write_pcap(&first, &[(0, frame(10, 60)), (1, frame(11, 60))]);
    write_pcap(&second, &[(0, frame(20, 60))]);
    let mut ctx = ReplayContext::new();
    ctx.add_source_file(&first).unwrap();
    ctx.add_source_file(&second).unwrap();
    let (sender, tape) = MockSender::new("mock0");
    ctx.set_sender(Intf::A, Box::new(sender)).unwrap();
    ctx.set_speed(SpeedMode::Topspeed).unwrap();

    assert_eq!(ctx.replay(None).unwrap(), Outcome::Completed);
    assert_eq!(markers(&tape), vec![10, 11, 20]);
    assert_eq!(ctx.current_source(), 1);

    // a second run restricted to the second source
    assert_eq!(ctx.replay(Some(1)).unwrap(), Outcome::Completed);
    assert_eq!(markers(&tape), vec![10, 11, 20, 20]);

    assert!(ctx.replay(Some(2)).is_err());
    fs::remove_file(&first).unwrap();
    fs::remove_file(&second).unwrap();
}

#[test]
fn replay_without_sources_or_interface_fails() {
    let mut ctx = ReplayContext::new();
    assert!(ctx.replay(None).is_err());
    assert!(ctx.last_error_text().unwrap().contains("source"));

    let pcap = temp_path("nointf.pcap");
    write_pcap(&pcap, &[(0, frame(0, 60))]);
    let mut ctx = ReplayContext::new();
    ctx.add_source_file(&pcap).unwrap();
    assert!(ctx.replay(None).is_err());
    assert!(ctx.last_error_text().unwrap().contains("interface"));
    fs::remove_file(&pcap).unwrap();
}
