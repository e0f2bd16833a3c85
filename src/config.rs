// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub round_trip: RoundTripConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vk-bootstrap".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preference order, first supported wins
    pub present_modes: Vec<String>,
    pub min_image_count: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_modes: vec!["immediate".to_string()],
            min_image_count: 4,
        }
    }
}

/// Buffer fill round trip run once after initialization
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RoundTripConfig {
    pub enabled: bool,
    /// Buffer size in bytes
    pub buffer_size: u64,
    /// Backing allocation in bytes (may exceed the buffer)
    pub allocation_size: u64,
    /// Byte repeated into every word of the buffer
    pub pattern: u8,
}

impl RoundTripConfig {
    /// Fill word: the pattern byte in all four lanes
    pub fn fill_word(&self) -> u32 {
        u32::from_ne_bytes([self.pattern; 4])
    }
}

impl Default for RoundTripConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 32,
            allocation_size: 64,
            pattern: 0x2A,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Present mode preference list as Vulkan enums, unknown names skipped
    pub fn present_modes(&self) -> Vec<vk::PresentModeKHR> {
        let modes: Vec<_> = self
            .graphics
            .present_modes
            .iter()
            .filter_map(|name| {
                let mode = parse_present_mode(name);
                if mode.is_none() {
                    log::warn!("Unknown present mode '{}', ignoring", name);
                }
                mode
            })
            .collect();

        if modes.is_empty() {
            vec![vk::PresentModeKHR::IMMEDIATE]
        } else {
            modes
        }
    }
}

pub fn parse_present_mode(name: &str) -> Option<vk::PresentModeKHR> {
    match name.to_lowercase().as_str() {
        "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
        "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
        "fifo" => Some(vk::PresentModeKHR::FIFO),
        "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
        _ => None,
    }
}
