use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use illuminate::logging::init_rust_logging;
use illuminate::{Color, Illuminate, IlluminateConfig};

#[derive(Parser, Debug)]
#[command(name = "illuminate", about = "Drive an Illuminate LED array over USB serial")]
struct Args {
    /// Serial port of the board (discovered by USB id when omitted)
    #[arg(long, global = true)]
    port: Option<String>,
    /// USB serial number of the board to open
    #[arg(long, global = true)]
    serial_number: Option<String>,
    /// JSON file with session settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Skip the reboot normally done when opening the board
    #[arg(long, global = true)]
    no_reboot: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List connected boards
    List,
    /// Print firmware version and device parameters
    Info,
    /// Light the whole array
    Fill {
        /// Color as R,G,B or a single gray level
        #[arg(long, default_value = "1")]
        color: String,
    },
    /// Turn every LED off
    Clear,
    /// Light exactly the given LEDs (opening the board starts from a dark array)
    Led {
        #[arg(required = true)]
        leds: Vec<usize>,
        /// Color as R,G,B or a single gray level
        #[arg(long, default_value = "1")]
        color: String,
    },
    /// Send a raw command and print the reply
    Ask { command: String },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    init_rust_logging();
    let args = Args::parse();

    if let Cmd::List = args.command {
        for device in illuminate::find(args.serial_number.as_deref())? {
            println!(
                "{}\t{}",
                device.port_name,
                device.serial_number.as_deref().unwrap_or("-")
            );
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => IlluminateConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => IlluminateConfig::default(),
    };
    if args.port.is_some() {
        config.port = args.port.clone();
    }
    if args.serial_number.is_some() {
        config.serial_number = args.serial_number.clone();
    }
    if args.no_reboot {
        config.reboot_on_open = false;
    }
    // Fill and led should stay lit after we exit.
    config.clear_on_close = !matches!(args.command, Cmd::Fill { .. } | Cmd::Led { .. });

    let mut light = Illuminate::open(config).context("opening the board")?;

    match args.command {
        Cmd::List => {}
        Cmd::Info => {
            println!("Version: {}", light.version());
            println!("{}", serde_json::to_string_pretty(light.parameters())?);
        }
        Cmd::Fill { color } => {
            light.set_color(parse_color(&color)?)?;
            light.fill_array()?;
        }
        Cmd::Clear => light.clear()?,
        Cmd::Led { leds, color } => {
            light.set_color(parse_color(&color)?)?;
            light.turn_on_led(leds)?;
            println!("Lit: {:?}", light.led());
        }
        Cmd::Ask { command } => {
            for line in light.ask_text(&command)? {
                println!("{line}");
            }
        }
    }

    light.close()?;
    Ok(())
}

fn parse_color(text: &str) -> Result<Color> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid color {text:?}"))?;
    match values.as_slice() {
        [gray] => Ok(Color::gray(*gray)),
        [r, g, b] => Ok(Color::new(*r, *g, *b)),
        _ => anyhow::bail!("color needs 1 or 3 values, got {}", values.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_takes_indices_and_a_color() {
        let args = Args::try_parse_from(["illuminate", "led", "1", "2", "--color", "0,5,0"]).unwrap();
        match args.command {
            Cmd::Led { leds, color } => {
                assert_eq!(leds, vec![1, 2]);
                assert_eq!(parse_color(&color).unwrap(), Color::new(0.0, 5.0, 0.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn led_rejects_unknown_flags_and_empty_lists() {
        assert!(Args::try_parse_from(["illuminate", "led", "1", "--keep"]).is_err());
        assert!(Args::try_parse_from(["illuminate", "led"]).is_err());
    }

    #[test]
    fn gray_color_shorthand() {
        assert_eq!(parse_color("7").unwrap(), Color::gray(7.0));
        assert!(parse_color("1,2").is_err());
    }
}
