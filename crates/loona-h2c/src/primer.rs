use std::fmt;

use base64ct::{Base64UrlUnpadded, Encoding};
use bytes::Bytes;
use smallvec::SmallVec;

use crate::frame::{
    parse_settings, write_settings_frame, Setting, SettingsError, DEFAULT_MAX_FRAME_SIZE,
};

/// The client settings carried by an `HTTP2-Settings` request header, decoded
/// and validated. The engine gets them as the first SETTINGS frame of the
/// upgraded connection.
///
/// See <https://www.rfc-editor.org/rfc/rfc7540#section-3.2.1>
#[derive(Clone, PartialEq, Eq)]
pub struct SettingsPrimer {
    payload: Bytes,
    settings: SmallVec<[(u16, u32); 8]>,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PrimerError {
    #[error("HTTP2-Settings is not valid base64url: {0}")]
    Base64(#[from] base64ct::Error),

    #[error("HTTP2-Settings payload is invalid: {0}")]
    Settings(#[from] SettingsError),
}

impl SettingsPrimer {
    /// Decodes the value of an `HTTP2-Settings` header. Padding is not
    /// supposed to be there, but it is tolerated.
    pub fn decode(value: &[u8]) -> Result<Self, PrimerError> {
        let trimmed = match value.iter().rposition(|&b| b != b'=') {
            Some(last) => &value[..=last],
            None => &[][..],
        };
        let trimmed =
            std::str::from_utf8(trimmed).map_err(|_| base64ct::Error::InvalidEncoding)?;
        let payload = Base64UrlUnpadded::decode_vec(trimmed)?;

        let mut settings = SmallVec::new();
        parse_settings(&payload, |id, value| {
            // unknown settings must be ignored, but they still go to the
            // engine verbatim
            if let Some(setting) = Setting::from_id(id) {
                setting.validate(value)?;
            }
            settings.push((id, value));
            Ok(())
        })?;

        Ok(Self {
            payload: payload.into(),
            settings,
        })
    }

    /// The raw SETTINGS payload, as declared by the client
    pub fn payload(&self) -> &[u8] {
        &self.payload[..]
    }

    /// Identifier/value pairs, in the order the client sent them
    pub fn settings(&self) -> &[(u16, u32)] {
        &self.settings[..]
    }

    /// The last value the client declared for `setting`, if any
    pub fn get(&self, setting: Setting) -> Option<u32> {
        self.settings
            .iter()
            .rev()
            .find(|(id, _)| *id == setting.id())
            .map(|(_, value)| *value)
    }

    /// The largest frame the client is willing to receive
    pub fn max_frame_size(&self) -> u32 {
        self.get(Setting::MaxFrameSize)
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Appends a SETTINGS frame carrying the client's settings to `out`.
    pub fn write_frame(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        write_settings_frame(&self.payload, out)
    }
}

impl fmt::Debug for SettingsPrimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for (id, value) in self.settings.iter() {
            match Setting::from_id(*id) {
                Some(setting) => list.entry(&setting, value),
                None => list.entry(id, value),
            };
        }
        list.finish()
    }
}
