use crate::config::ConfigError;
use crate::converter::{kx134_scaling, Converter};
use crate::link::DeviceLink;

/// Settings key holding the KX134 measurement range selector.
pub const KEY_G_RANGE: u8 = b'g';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccelerometerType {
    Kx134,
    /// No accelerometer fitted; the board streams a single ADC channel.
    None,
    /// Anything this host does not know; treated like a plain ADC board.
    Unknown(String),
}

impl AccelerometerType {
    pub fn parse(reported: &str) -> AccelerometerType {
        match reported.trim() {
            "KX134" => AccelerometerType::Kx134,
            "" | "NONE" | "none" => AccelerometerType::None,
            other => AccelerometerType::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardIdentity {
    board_id: String,
    accelerometer_type: AccelerometerType,
}

impl BoardIdentity {
    pub fn new(board_id: &str, accelerometer_type: &str) -> BoardIdentity {
        BoardIdentity {
            board_id: board_id.trim().to_string(),
            accelerometer_type: AccelerometerType::parse(accelerometer_type),
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn accelerometer_type(&self) -> &AccelerometerType {
        &self.accelerometer_type
    }
}

/// Sample width and unit conversion for one session, fixed before streaming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLayout {
    pub width: usize,
    pub converter: Converter,
}

impl ChannelLayout {
    /// Derives the layout from the board identity, reading any range settings
    /// the accelerometer needs from the board itself.
    pub fn for_board<L: DeviceLink + ?Sized>(
        identity: &BoardIdentity,
        link: &mut L,
    ) -> Result<ChannelLayout, ConfigError> {
        if identity.board_id().is_empty() {
            return Err(ConfigError::UnsupportedBoard(
                "board did not report an identifier".into(),
            ));
        }

        match identity.accelerometer_type() {
            AccelerometerType::Kx134 => {
                let gsel = link.query(KEY_G_RANGE)?;
                let scaling = kx134_scaling(gsel).ok_or(ConfigError::UnsupportedRange(gsel))?;

                log::info!("KX134 range selector {}, scaling {} g/LSB", gsel, scaling);

                Ok(ChannelLayout {
                    width: 3,
                    converter: Converter::signed_int16(scaling),
                })
            }
            AccelerometerType::None => Ok(ChannelLayout {
                width: 1,
                converter: Converter::NoConversion,
            }),
            AccelerometerType::Unknown(name) => {
                log::warn!("unknown accelerometer type {:?}, sampling as ADC", name);

                Ok(ChannelLayout {
                    width: 1,
                    converter: Converter::NoConversion,
                })
            }
        }
    }
}
