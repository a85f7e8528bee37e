use crate::sample::{ConvertedSample, Sample};

/// Maps raw channel readings to engineering units.
///
/// New device families get a new variant here rather than type-string checks
/// scattered around the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Converter {
    /// Raw integer values, cast to `f64` as they are.
    #[default]
    NoConversion,
    /// Values interpreted as signed 16-bit and multiplied by `scaling`.
    SignedInt16 { scaling: f64 },
}

impl Converter {
    pub fn signed_int16(scaling: f64) -> Converter {
        Converter::SignedInt16 { scaling }
    }

    pub fn convert_value(&self, raw: i16) -> f64 {
        match *self {
            Converter::NoConversion => raw as f64,
            Converter::SignedInt16 { scaling } => raw as f64 * scaling,
        }
    }

    pub fn convert(&self, sample: &Sample) -> ConvertedSample {
        let values = sample
            .channels()
            .iter()
            .map(|&raw| self.convert_value(raw))
            .collect();

        ConvertedSample::new(sample.timestamp(), values)
    }
}

/// g per LSB for the KX134 at range selector `gsel` (0 => ±8g ... 3 => ±64g).
///
/// Returns `None` for selectors the part does not have.
pub fn kx134_scaling(gsel: u32) -> Option<f64> {
    if gsel > 3 {
        return None;
    }

    let exponent = 15 - (3 + gsel as i32);
    Some(1.0 / 2f64.powi(exponent))
}
