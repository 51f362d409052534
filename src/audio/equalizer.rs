use serde::Serialize;
use std::{fmt, str::FromStr};

/// Number of bands in a Lavalink equalizer (25 Hz .. 16 kHz).
pub const BAND_COUNT: usize = 15;

/// Gain for one band, -0.25 (muted) .. 1.0 (doubled).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Band {
    pub band: u8,
    pub gain: f32,
}

/// The fixed set of equalizer presets a DJ can pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqualizerPreset {
    #[default]
    Flat,
    Boost,
    Metal,
    Piano,
}

impl EqualizerPreset {
    pub const ALL: [EqualizerPreset; 4] = [Self::Flat, Self::Boost, Self::Metal, Self::Piano];

    pub fn name(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Boost => "boost",
            Self::Metal => "metal",
            Self::Piano => "piano",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|p| p.name()).collect()
    }

    fn gains(self) -> [f32; BAND_COUNT] {
        match self {
            Self::Flat => [0.0; BAND_COUNT],
            // Graves y agudos realzados, medios casi planos
            Self::Boost => [
                -0.075, 0.125, 0.125, 0.1, 0.1, 0.05, 0.075, 0.0, 0.0, 0.0, 0.0, 0.0, 0.125, 0.15,
                0.05,
            ],
            Self::Metal => [
                0.0, 0.1, 0.1, 0.15, 0.13, 0.1, 0.0, 0.125, 0.175, 0.175, 0.125, 0.125, 0.1, 0.075,
                0.0,
            ],
            Self::Piano => [
                -0.25, -0.25, -0.125, 0.0, 0.25, 0.25, 0.0, -0.25, -0.25, 0.0, 0.0, 0.5, 0.25,
                -0.025, 0.0,
            ],
        }
    }

    /// Per-band gains in the node's wire layout.
    pub fn bands(self) -> Vec<Band> {
        self.gains()
            .iter()
            .enumerate()
            .map(|(band, gain)| Band {
                band: band as u8,
                gain: *gain,
            })
            .collect()
    }
}

impl FromStr for EqualizerPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|preset| preset.name() == wanted)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for EqualizerPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
