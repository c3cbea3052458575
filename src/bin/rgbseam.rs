use rgbseam::{energy_to_image, Algorithm, BackendKind, CarveConfig, ShaderPaths, CHANNELS};
use std::io;
use std::path::PathBuf;

use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use failure::{err_msg, Error};
use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{ExtendedColorType, ImageEncoder};
use log::info;

fn cli() -> Command {
    Command::new("rgbseam")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Content-aware width reduction by seam carving")
        .arg(
            Arg::new("input")
                .help("The image to carve")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .index(1),
        )
        .arg(
            Arg::new("output")
                .help("Where to write the result; '-' writes a PNM to stdout")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .short('w')
                .help("Target width in pixels")
                .value_parser(value_parser!(u32))
                .conflicts_with("scale"),
        )
        .arg(
            Arg::new("scale")
                .long("scale")
                .short('s')
                .help("Target width as a percentage of the original (10-100)")
                .value_parser(value_parser!(u32).range(10..=100)),
        )
        .arg(
            Arg::new("algorithm")
                .long("algorithm")
                .short('a')
                .help("Seam finder")
                .value_parser(["greedy", "dynamic"])
                .default_value("greedy"),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .short('b')
                .help("Where energy is computed")
                .value_parser(["cpu", "gpu"])
                .default_value("cpu"),
        )
        .arg(
            Arg::new("vertex-shader")
                .long("vertex-shader")
                .help("Vertex stage for the gpu backend")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("fragment-shader")
                .long("fragment-shader")
                .help("Fragment stage for the gpu backend")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("energy")
                .long("energy")
                .help("Write the energy map of the input instead of carving it")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .help("More logging; repeat for more still")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log warnings and errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
}

fn init_logging(matches: &ArgMatches) {
    let level = if matches.get_flag("quiet") {
        "warn"
    } else {
        match matches.get_count("verbose") {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn string_arg<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String, Error> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| err_msg(format!("missing --{}", name)))
}

fn config_from(matches: &ArgMatches) -> Result<CarveConfig, Error> {
    let algorithm: Algorithm = string_arg(matches, "algorithm")?.parse().map_err(err_msg)?;
    let backend: BackendKind = string_arg(matches, "backend")?.parse().map_err(err_msg)?;

    let defaults = ShaderPaths::default();
    let shaders = ShaderPaths::new(
        matches
            .get_one::<PathBuf>("vertex-shader")
            .cloned()
            .unwrap_or(defaults.vertex),
        matches
            .get_one::<PathBuf>("fragment-shader")
            .cloned()
            .unwrap_or(defaults.fragment),
    );
    Ok(CarveConfig {
        algorithm,
        backend,
        shaders,
    })
}

fn target_width(matches: &ArgMatches, width: u32) -> u32 {
    if let Some(w) = matches.get_one::<u32>("width") {
        return *w;
    }
    match matches.get_one::<u32>("scale") {
        Some(pct) => (u64::from(width) * u64::from(*pct) / 100) as u32,
        None => width,
    }
}

fn write_output(output: &str, pixels: &[u8], width: u32, height: u32, gray: bool) -> Result<(), Error> {
    let (subtype, color) = if gray {
        (PnmSubtype::Graymap(SampleEncoding::Binary), ExtendedColorType::L8)
    } else {
        (PnmSubtype::Pixmap(SampleEncoding::Binary), ExtendedColorType::Rgb8)
    };
    if output == "-" {
        let stdout = io::stdout();
        PnmEncoder::new(stdout.lock())
            .with_subtype(subtype)
            .write_image(pixels, width, height, color)?;
    } else {
        image::save_buffer(output, pixels, width, height, color)?;
    }
    Ok(())
}

fn run() -> Result<(), Error> {
    let matches = cli().get_matches();
    init_logging(&matches);
    let config = config_from(&matches)?;

    let input = matches
        .get_one::<PathBuf>("input")
        .ok_or_else(|| err_msg("no input image"))?;
    let output = string_arg(&matches, "output")?;

    let image = image::open(input)?.to_rgb8();
    let (width, height) = image.dimensions();
    info!("Image loaded: {} ({}x{})", input.display(), width, height);

    if matches.get_flag("energy") {
        let mut backend = config.build_backend()?;
        let energy = backend.compute_energy(image.as_raw(), width, height, CHANNELS)?;
        let map = energy_to_image(&energy);
        return write_output(output, map.as_raw(), width, height, true);
    }

    let target = target_width(&matches, width);
    let mut carver = config.carver()?;
    let carved = carver.reduce_width(image.as_raw(), width, height, CHANNELS, target)?;
    write_output(output, &carved.pixels, carved.width, height, false)
}

fn main() {
    if let Err(err) = run() {
        eprintln!("rgbseam: {}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn scale_is_a_percentage_of_width() {
        let m = cli().get_matches_from(["rgbseam", "in.png", "out.png", "--scale", "50"]);
        assert_eq!(target_width(&m, 301), 150);
        let m = cli().get_matches_from(["rgbseam", "in.png", "out.png"]);
        assert_eq!(target_width(&m, 301), 301);
        let m = cli().get_matches_from(["rgbseam", "in.png", "out.png", "-w", "12"]);
        assert_eq!(target_width(&m, 301), 12);
    }

    #[test]
    fn scale_and_width_conflict() {
        let result = cli().try_get_matches_from(["rgbseam", "a", "b", "-w", "3", "-s", "50"]);
        assert!(result.is_err());
        let result = cli().try_get_matches_from(["rgbseam", "a", "b", "-s", "5"]);
        assert!(result.is_err());
    }

    #[test]
    fn config_from_flags() {
        let m = cli().get_matches_from([
            "rgbseam",
            "a",
            "b",
            "--algorithm",
            "dynamic",
            "--fragment-shader",
            "my.wgsl",
        ]);
        let config = config_from(&m).unwrap();
        assert_eq!(config.algorithm, Algorithm::Dynamic);
        assert_eq!(config.backend, BackendKind::Cpu);
        assert_eq!(config.shaders.fragment, PathBuf::from("my.wgsl"));
        assert_eq!(config.shaders.vertex, ShaderPaths::default().vertex);
    }
}
