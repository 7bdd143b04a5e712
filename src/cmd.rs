use clap::{ArgGroup, Parser, ValueEnum};
use repcap::timing::TimerKind;

#[derive(Debug, Parser)]
#[command(author, version, about = "Replay captured network traffic out one or two interfaces", long_about = None)]
#[command(group(
    ArgGroup::new("speed")
        .args(["multiplier", "mbps", "pps", "topspeed", "oneatatime"]),
))]
pub struct Args {
    #[arg(short = 'i', long, help = "Interface to send traffic out of")]
    pub intf1: String,
    #[arg(
        short = 'I',
        long,
        help = "Second interface, for packets the classification bitmap routes away from the first"
    )]
    pub intf2: Option<String>,
    #[arg(
        short = 'b',
        long,
        requires = "intf2",
        help = "Classification bitmap file that routes each packet of a single capture file to one of the two interfaces"
    )]
    pub bitmap: Option<String>,
    #[arg(
        short = 'l',
        long = "loop",
        default_value_t = 1,
        help = "Number of times to replay the capture files (0 = loop forever)"
    )]
    pub loop_count: u32,
    #[arg(
        short = 'L',
        long,
        help = "Stop cleanly after this many packets have been sent"
    )]
    pub limit: Option<u64>,
    #[arg(
        short = 'x',
        long,
        help = "Replay at a multiple of the original capture rate (1.0 = as captured)"
    )]
    pub multiplier: Option<f64>,
    #[arg(
        short = 'M',
        long,
        help = "Replay at a fixed aggregate rate in Mbit/s (0 = unbounded)"
    )]
    pub mbps: Option<f64>,
    #[arg(short = 'p', long, help = "Replay at a fixed rate in packets/second")]
    pub pps: Option<f64>,
    #[arg(
        long,
        default_value_t = 1,
        help = "Number of packets to send back-to-back per pps interval"
    )]
    pub pps_multi: u32,
    #[arg(
        short = 't',
        long,
        default_value_t = false,
        help = "Replay as fast as the interfaces accept packets"
    )]
    pub topspeed: bool,
    #[arg(
        short = '1',
        long,
        default_value_t = false,
        help = "Interactively step one packet at a time (Enter sends the next packet, q quits)"
    )]
    pub oneatatime: bool,
    #[arg(
        short = 'T',
        long,
        value_enum,
        help = "Timing strategy used to wait between packets. The default is abstime where the platform has it, else gtod"
    )]
    pub timer: Option<TimerArg>,
    #[arg(
        long,
        default_value_t = 0,
        help = "Microseconds subtracted from every planned sleep to compensate wake-up latency"
    )]
    pub sleep_accel: u64,
    #[arg(
        long,
        default_value_t = 1500,
        help = "Outbound MTU ceiling; larger packets are counted as failed and skipped"
    )]
    pub mtu: u32,
    #[arg(
        long,
        default_value_t = false,
        help = "Pace on the original packet length instead of the captured length. Use with caution on truncated captures"
    )]
    pub pktlen: bool,
    #[arg(
        long,
        default_value_t = false,
        help = "Keep decoded packets in memory after the first pass. Only useful when looping; the whole capture must fit in RAM"
    )]
    pub enable_file_cache: bool,
    #[arg(long, value_name = "SECS", help = "Log replay statistics every SECS seconds")]
    pub stats: Option<u64>,
    #[arg(required = true, help = "Capture files to replay, in order")]
    pub files: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum TimerArg {
    Abstime,
    Gtod,
    Nano,
    Select,
    Rdtsc,
    Ioport,
}

impl From<TimerArg> for TimerKind {
    fn from(arg: TimerArg) -> TimerKind {
        match arg {
            TimerArg::Abstime => TimerKind::AbsTime,
            TimerArg::Gtod => TimerKind::Gtod,
            TimerArg::Nano => TimerKind::Nanosleep,
            TimerArg::Select => TimerKind::Select,
            TimerArg::Rdtsc => TimerKind::Rdtsc,
            TimerArg::Ioport => TimerKind::Ioport,
        }
    }
}
