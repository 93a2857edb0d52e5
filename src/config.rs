//! Command line parsing and display configuration

use std::ffi::OsString;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

/// Mute colour used when `-c` is not given
pub const DEFAULT_MUTE_COLOR: &str = "#FF7F00";

/// Usage text printed on `-h` and on any argument error
pub const USAGE: &str = "\
Usage: {prog} [-hduji] [-s INDEX] [-m FUNC] [-c COLOR]
Options:
  -s INDEX: pulseaudio sink index on which to wait for changes (default: 0)
  -m FUNC : function used to compute the displayed volume value
            if there are multiple channels (eg. left/right):
             * avg: use average volume of all channels (default)
             * min: use minimum volume of all channels
             * max: use maximum volume of all channels
  -c COLOR: use the specified color for display when muted. Only makes
            sense if -j is used. Format: #RRGGBB (HTML) (default: #FF7F00)
  -h      : display this message
  -d      : use decibel notation instead of 0-100 percentage; the sink may
            not support this feature
  -u      : include measurement units in the output (% or dB)
  -j      : use JSON output. When muted, output is colored. See -c
  -i      : Prepend 'M' to the volume when muted instead of displaying 0
";

/// Render the usage text for the given program name
pub fn usage(prog: &str) -> String {
    USAGE.replace("{prog}", prog)
}

/// How per-channel volumes collapse into the displayed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Aggregator {
    /// Mean of all channels
    #[default]
    Avg,
    /// Quietest channel
    Min,
    /// Loudest channel
    Max,
}

impl Aggregator {
    /// Reduce raw channel volumes to one raw volume
    ///
    /// Matches the server's own channel-volume helpers: the mean truncates,
    /// and an empty channel list reduces to silence.
    pub fn reduce(self, volumes: &[u32]) -> u32 {
        if volumes.is_empty() {
            return 0;
        }

        match self {
            Aggregator::Avg => {
                let sum: u64 = volumes.iter().map(|&v| u64::from(v)).sum();
                (sum / volumes.len() as u64) as u32
            }
            Aggregator::Min => volumes.iter().copied().min().unwrap_or(0),
            Aggregator::Max => volumes.iter().copied().max().unwrap_or(0),
        }
    }
}

/// Raw command line
#[derive(Debug, Parser)]
#[command(
    disable_help_flag = true,
    disable_version_flag = true,
    args_override_self = true
)]
pub struct Args {
    /// Sink index to observe
    #[arg(short = 's', value_name = "INDEX", default_value_t = 0)]
    pub sink: u32,

    /// Channel aggregator
    #[arg(short = 'm', value_name = "FUNC", value_enum, default_value_t = Aggregator::Avg)]
    pub aggregator: Aggregator,

    /// Colour used for muted output in JSON mode
    #[arg(short = 'c', value_name = "COLOR", default_value = DEFAULT_MUTE_COLOR)]
    pub mute_color: String,

    /// Show decibels instead of percentage
    #[arg(short = 'd')]
    pub decibel: bool,

    /// Append the unit suffix
    #[arg(short = 'u')]
    pub units: bool,

    /// Show "M" when muted instead of forcing zero
    #[arg(short = 'i')]
    pub mute_indicator: bool,

    /// Emit i3bar JSON blocks
    #[arg(short = 'j')]
    pub json: bool,

    /// Print usage and exit
    #[arg(short = 'h')]
    pub help: bool,
}

/// Display configuration, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Index of the sink whose volume is shown
    pub observed_index: u32,

    pub aggregator: Aggregator,

    /// Show the server's decibel scale instead of a percentage
    pub use_decibel: bool,

    /// Append "%" or " dB"
    pub show_units: bool,

    /// Prefix "M " when muted instead of showing zero
    pub show_mute_indicator: bool,

    /// Wrap each line in an i3bar JSON block
    pub json_output: bool,

    /// `#RRGGBB` or `#RRGGBBAA`
    pub mute_color: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            observed_index: 0,
            aggregator: Aggregator::Avg,
            use_decibel: false,
            show_units: false,
            show_mute_indicator: false,
            json_output: false,
            mute_color: DEFAULT_MUTE_COLOR.to_string(),
        }
    }
}

impl Config {
    /// Build the configuration from parsed arguments, validating the colour
    pub fn from_args(args: Args) -> Result<Self> {
        validate_color(&args.mute_color)?;

        Ok(Self {
            observed_index: args.sink,
            aggregator: args.aggregator,
            use_decibel: args.decibel,
            show_units: args.units,
            show_mute_indicator: args.mute_indicator,
            json_output: args.json,
            mute_color: args.mute_color,
        })
    }
}

/// What the command line asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Watch a sink with this configuration
    Run(Config),
    /// Print usage and exit successfully
    Help,
}

/// Parse the full argument vector, program name first
///
/// Options are honoured left to right: a `-h` seen before the first bad
/// option or value wins, one seen after it does not. Repeated options keep
/// their last value.
pub fn parse_invocation<I, T>(argv: I) -> Result<Invocation>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();

    let args = match Args::try_parse_from(argv.iter().cloned()) {
        Ok(args) => args,
        Err(_) if help_comes_first(&argv) => return Ok(Invocation::Help),
        Err(e) => bail!("{}", describe_parse_error(&e)),
    };

    if args.help {
        return Ok(Invocation::Help);
    }

    Config::from_args(args).map(Invocation::Run)
}

/// First line of clap's message, which names the offending argument
fn describe_parse_error(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default().trim();
    let message = first.strip_prefix("error:").unwrap_or(first).trim();

    if message.is_empty() {
        err.kind().as_str().unwrap_or("invalid arguments").to_string()
    } else {
        message.to_string()
    }
}

/// Walk short-option clusters in order and report whether `-h` shows up
/// before anything that would be rejected
fn help_comes_first(argv: &[OsString]) -> bool {
    let mut tokens = argv.iter().skip(1).map(|arg| arg.to_string_lossy());

    while let Some(token) = tokens.next() {
        if token == "--" {
            return false;
        }
        let Some(cluster) = token.strip_prefix('-').filter(|c| !c.is_empty()) else {
            continue;
        };

        for (pos, flag) in cluster.char_indices() {
            match flag {
                'h' => return true,
                'd' | 'u' | 'i' | 'j' => {}
                's' | 'm' | 'c' => {
                    let attached = &cluster[pos + flag.len_utf8()..];
                    let value = if attached.is_empty() {
                        match tokens.next() {
                            Some(next) => next.into_owned(),
                            None => return false,
                        }
                    } else {
                        attached.to_string()
                    };

                    if !option_value_is_valid(flag, &value) {
                        return false;
                    }
                    break;
                }
                _ => return false,
            }
        }
    }

    false
}

fn option_value_is_valid(flag: char, value: &str) -> bool {
    match flag {
        's' => value.parse::<u32>().is_ok(),
        'm' => Aggregator::from_str(value, false).is_ok(),
        _ => true,
    }
}

fn validate_color(color: &str) -> Result<()> {
    let Some(digits) = color.strip_prefix('#') else {
        bail!("invalid color: {color} (expected #RRGGBB)");
    };

    if !matches!(digits.len(), 6 | 8) || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid color: {color} (expected #RRGGBB)");
    }

    Ok(())
}
