//! Command-line argument parsing.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use glam::{Vec2, Vec3};

use crate::camera::Camera;
use crate::noise::Wave;
use crate::params::{ConfigError, DeviceType, SimConfig};
use crate::resources::ResourceLocator;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "tidegrid")]
#[command(about = "Headless projected-grid ocean simulator", long_about = None)]
pub struct Args {
    /// Number of frames to simulate
    #[arg(long, value_name = "N", default_value = "60")]
    pub frames: u32,

    /// Time step per frame
    #[arg(long, value_name = "SECONDS", default_value = "0.016")]
    pub dt: f32,

    /// Grid resolution (overrides the config file)
    #[arg(long, value_name = "N")]
    pub complexity: Option<u32>,

    /// Noise octaves (overrides the config file)
    #[arg(long, value_name = "N")]
    pub octaves: Option<u32>,

    /// Accelerator device class (overrides the config file)
    #[arg(long, value_enum)]
    pub device_type: Option<DeviceType>,

    /// RON options file with `grid` and `noise` sections
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the effective options (file plus overrides) to FILE
    #[arg(long, value_name = "FILE")]
    pub write_config: Option<PathBuf>,

    /// Camera height above the water
    #[arg(long, value_name = "METERS", default_value = "40")]
    pub camera_height: f32,

    /// Camera pitch below the horizon
    #[arg(long, value_name = "DEGREES", default_value = "20")]
    pub pitch_degrees: f32,

    /// World height of the water plane
    #[arg(long, value_name = "METERS", default_value = "0")]
    pub water_level: f32,

    /// Add a wave: DIR_X,DIR_Z,AMPLITUDE,PERIOD,PHASE (repeatable)
    #[arg(long = "wave", value_name = "WAVE")]
    pub waves: Vec<WaveArg>,

    /// Write a grayscale heightmap around the camera
    #[arg(long, value_name = "FILE.png")]
    pub heightmap: Option<PathBuf>,

    /// Heightmap edge length in pixels
    #[arg(long, value_name = "PIXELS", default_value = "256")]
    pub heightmap_size: u32,

    /// World meters per heightmap pixel
    #[arg(long, value_name = "METERS", default_value = "1")]
    pub heightmap_spacing: f32,

    /// Skip accelerator setup; run every stage on the host
    #[arg(long)]
    pub host_only: bool,

    /// Extra directory searched first for the WGSL kernels (repeatable)
    #[arg(long, value_name = "DIR")]
    pub kernel_dir: Vec<PathBuf>,
}

/// Parsed `--wave` value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveArg(pub Wave);

impl FromStr for WaveArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s
            .split(',')
            .map(|f| f.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid wave `{s}`: {e}"))?;
        let [dx, dz, amplitude, period, phase] = fields[..] else {
            return Err(format!(
                "invalid wave `{s}`: expected DIR_X,DIR_Z,AMPLITUDE,PERIOD,PHASE"
            ));
        };
        if period <= 0.0 {
            return Err(format!("invalid wave `{s}`: period must be positive"));
        }
        Ok(WaveArg(Wave::new(Vec2::new(dx, dz), amplitude, period, phase)))
    }
}

impl Args {
    /// Options from the config file (if any) with command-line overrides on top
    pub fn load_options(&self) -> Result<SimConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => SimConfig::load(path)?,
            None => SimConfig::default(),
        };
        if let Some(complexity) = self.complexity {
            config.grid.complexity = complexity;
        }
        if let Some(octaves) = self.octaves {
            config.noise.octaves = octaves;
        }
        if let Some(device_type) = self.device_type {
            config.grid.device_type = device_type;
        }
        Ok(config)
    }

    /// Kernel search path: `--kernel-dir`s, then the defaults
    pub fn locator(&self) -> ResourceLocator {
        ResourceLocator::with_dirs(self.kernel_dir.clone())
    }

    /// Camera above the origin looking down the -Z axis at `pitch_degrees`
    pub fn camera(&self) -> Camera {
        let pitch = self.pitch_degrees.to_radians();
        let mut camera = Camera {
            position: Vec3::new(0.0, self.water_level + self.camera_height, 0.0),
            ..Camera::default()
        };
        camera.set_direction(Vec3::new(0.0, -pitch.sin(), -pitch.cos()));
        camera
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_arg() {
        let WaveArg(wave) = "1,0,2.5,4,0.5".parse().unwrap();
        assert_eq!(wave.direction, Vec2::X);
        assert_eq!(wave.amplitude, 2.5);
        assert_eq!(wave.period, 4.0);
        assert_eq!(wave.phase, 0.5);

        assert!("1,0,2".parse::<WaveArg>().is_err());
        assert!("1,0,2,x,0".parse::<WaveArg>().is_err());
        assert!("1,0,2,0,0".parse::<WaveArg>().is_err());
    }

    #[test]
    fn test_overrides_apply_on_top_of_defaults() {
        let args = Args::parse_from([
            "tidegrid",
            "--complexity",
            "32",
            "--device-type",
            "gpu",
            "--wave",
            "0,1,1,3,0",
            "--wave",
            "1,1,0.5,2,0",
        ]);
        let config = args.load_options().unwrap();
        assert_eq!(config.grid.complexity, 32);
        assert_eq!(config.grid.device_type, DeviceType::Gpu);
        assert_eq!(config.noise, crate::params::NoiseOptions::default());
        assert_eq!(args.waves.len(), 2);
    }

    #[test]
    fn test_camera_pitch() {
        let args = Args::parse_from(["tidegrid", "--camera-height", "10", "--pitch-degrees", "30"]);
        let camera = args.camera();
        assert_eq!(camera.position.y, 10.0);
        let dir = camera.direction();
        assert!((dir.y + 0.5).abs() < 1e-5);
        assert!(dir.z < 0.0);
    }

    #[test]
    fn test_overrides_win_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocean.ron");
        std::fs::write(&path, "(grid: (Complexity: 64, Strength: 12.0))").unwrap();

        let args = Args::parse_from([
            "tidegrid",
            "--config",
            path.to_str().unwrap(),
            "--complexity",
            "16",
        ]);
        let config = args.load_options().unwrap();
        assert_eq!(config.grid.complexity, 16);
        assert_eq!(config.grid.strength, 12.0);
    }

    #[test]
    fn test_kernel_dirs_searched_first() {
        let args = Args::parse_from(["tidegrid", "--kernel-dir", "/opt/kernels"]);
        let locator = args.locator();
        assert_eq!(locator.search_dirs()[0], PathBuf::from("/opt/kernels"));
        assert!(locator.search_dirs().len() >= 2);
    }
}
