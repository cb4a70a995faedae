//! Request parameter normalization.
//!
//! Query fields arrive loosely typed. Everything downstream of the transport
//! works on [`CanonicalParameters`], whose serialized form is byte-identical for
//! identical logical requests regardless of casing or omitted defaults.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

pub const DEFAULT_VIDEO_CODEC: &str = "h264";
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
pub const DEFAULT_BITRATE: &str = "1500k";
pub const DEFAULT_RESOLUTION: Resolution = Resolution {
    width: 1280,
    height: 720,
};
pub const DEFAULT_SEGMENT_DURATION: u32 = 2;
pub const DEFAULT_LIST_SIZE: u32 = 6;

const MIN_SEGMENT_DURATION: u32 = 1;
const MIN_LIST_SIZE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("missing required parameter `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl ParamError {
    fn invalid(field: &'static str, value: &str) -> Self {
        Self::InvalidField {
            field,
            value: value.to_string(),
        }
    }
}

/// Request fields exactly as they appear on the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStreamRequest {
    pub src: Option<String>,
    pub v: Option<String>,
    pub a: Option<String>,
    pub br: Option<String>,
    pub res: Option<String>,
    pub fps: Option<String>,
    #[serde(rename = "segDur")]
    pub seg_dur: Option<String>,
    #[serde(rename = "listSize")]
    pub list_size: Option<String>,
    #[serde(rename = "segmentType")]
    pub segment_type: Option<String>,
}

/// HLS segment container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    #[default]
    Ts,
    Fmp4,
}

impl SegmentType {
    /// Unknown values fall back to MPEG-TS rather than failing the request.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "fmp4" => Self::Fmp4,
            _ => Self::Ts,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ts => "ts",
            Self::Fmp4 => "fmp4",
        }
    }

    /// File extension of the numbered segment files.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ts => "ts",
            Self::Fmp4 => "m4s",
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output frame size, serialized as `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Parse `WxH` (case-insensitive). Values without an `x` separator select
    /// the default; a separator with non-numeric or zero sides is rejected.
    pub fn parse(value: &str) -> Result<Self, ParamError> {
        let lowered = value.trim().to_ascii_lowercase();
        let Some((w, h)) = lowered.split_once('x') else {
            return Ok(DEFAULT_RESOLUTION);
        };

        let width = w.trim().parse::<u32>().ok().filter(|w| *w > 0);
        let height = h.trim().parse::<u32>().ok().filter(|h| *h > 0);
        match (width, height) {
            (Some(width), Some(height)) => Ok(Self { width, height }),
            _ => Err(ParamError::invalid("res", value)),
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        DEFAULT_RESOLUTION
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Validated, defaulted encoding parameters for one logical stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalParameters {
    pub src: String,
    #[serde(rename = "v")]
    pub video_codec: String,
    #[serde(rename = "a")]
    pub audio_codec: String,
    #[serde(rename = "br")]
    pub bitrate: String,
    #[serde(rename = "res")]
    pub resolution: Resolution,
    pub fps: Option<u32>,
    #[serde(rename = "segDur")]
    pub segment_duration: u32,
    #[serde(rename = "listSize")]
    pub list_size: u32,
    #[serde(rename = "segmentType")]
    pub segment_type: SegmentType,
}

impl CanonicalParameters {
    /// Compact JSON with lexicographically ordered keys. This is the input to
    /// session key derivation, so its layout must never depend on field order.
    pub fn canonical_json(&self) -> String {
        // Keys are written pre-sorted so the output is stable even when
        // serde_json is built with `preserve_order`.
        serde_json::json!({
            "a": self.audio_codec,
            "br": self.bitrate,
            "fps": self.fps,
            "listSize": self.list_size,
            "res": self.resolution.to_string(),
            "segDur": self.segment_duration,
            "segmentType": self.segment_type.as_str(),
            "src": self.src,
            "v": self.video_codec,
        })
        .to_string()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_floored(field: &'static str, value: Option<&str>, default: u32, min: u32) -> Result<u32, ParamError> {
    let Some(raw) = value else {
        return Ok(default.max(min));
    };
    let parsed = raw
        .parse::<i64>()
        .map_err(|_| ParamError::invalid(field, raw))?;
    Ok(parsed.clamp(i64::from(min), i64::from(u32::MAX)) as u32)
}

fn parse_fps(value: Option<&str>) -> Result<Option<u32>, ParamError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .ok_or_else(|| ParamError::invalid("fps", raw))?;
    let fps = parsed.trunc().min(f64::from(u32::MAX)) as u32;
    Ok((fps > 0).then_some(fps))
}

/// Map raw request fields onto [`CanonicalParameters`].
///
/// Pure: no I/O, and the same input always yields the same output.
pub fn normalize(raw: &RawStreamRequest) -> Result<CanonicalParameters, ParamError> {
    let src = present(&raw.src).ok_or(ParamError::MissingField("src"))?;

    let video_codec = present(&raw.v)
        .unwrap_or(DEFAULT_VIDEO_CODEC)
        .to_ascii_lowercase();
    let audio_codec = present(&raw.a)
        .unwrap_or(DEFAULT_AUDIO_CODEC)
        .to_ascii_lowercase();
    let bitrate = present(&raw.br).unwrap_or(DEFAULT_BITRATE).to_string();

    let resolution = match present(&raw.res) {
        Some(res) => Resolution::parse(res)?,
        None => DEFAULT_RESOLUTION,
    };

    let segment_type = present(&raw.segment_type)
        .map(SegmentType::parse_lenient)
        .unwrap_or_default();

    Ok(CanonicalParameters {
        src: src.to_string(),
        video_codec,
        audio_codec,
        bitrate,
        resolution,
        fps: parse_fps(present(&raw.fps))?,
        segment_duration: parse_floored(
            "segDur",
            present(&raw.seg_dur),
            DEFAULT_SEGMENT_DURATION,
            MIN_SEGMENT_DURATION,
        )?,
        list_size: parse_floored(
            "listSize",
            present(&raw.list_size),
            DEFAULT_LIST_SIZE,
            MIN_LIST_SIZE,
        )?,
        segment_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(src: &str) -> RawStreamRequest {
        RawStreamRequest {
            src: Some(src.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_fill_omitted_fields() {
        let params = normalize(&raw("https://example.com/live.m3u8")).unwrap();

        assert_eq!(params.video_codec, "h264");
        assert_eq!(params.audio_codec, "aac");
        assert_eq!(params.bitrate, "1500k");
        assert_eq!(params.resolution, Resolution { width: 1280, height: 720 });
        assert_eq!(params.fps, None);
        assert_eq!(params.segment_duration, 2);
        assert_eq!(params.list_size, 6);
        assert_eq!(params.segment_type, SegmentType::Ts);
    }

    #[test]
    fn missing_src_is_rejected() {
        let err = normalize(&RawStreamRequest::default()).unwrap_err();
        assert_eq!(err, ParamError::MissingField("src"));

        let blank = normalize(&raw("   ")).unwrap_err();
        assert_eq!(blank, ParamError::MissingField("src"));
    }

    #[test]
    fn explicit_defaults_and_casing_normalize_identically() {
        let implicit = normalize(&raw("https://example.com/a.mp4")).unwrap();
        let explicit = normalize(&RawStreamRequest {
            src: Some("https://example.com/a.mp4".to_string()),
            v: Some("H264".to_string()),
            a: Some(" AAC ".to_string()),
            br: Some("1500k".to_string()),
            res: Some("1280X720".to_string()),
            fps: Some("0".to_string()),
            seg_dur: Some("2".to_string()),
            list_size: Some("6".to_string()),
            segment_type: Some("TS".to_string()),
        })
        .unwrap();

        assert_eq!(implicit, explicit);
        assert_eq!(implicit.canonical_json(), explicit.canonical_json());
    }

    #[test]
    fn canonical_json_is_sorted_and_compact() {
        let params = normalize(&RawStreamRequest {
            src: Some("https://example.com/a.mp4".to_string()),
            fps: Some("30".to_string()),
            segment_type: Some("fmp4".to_string()),
            ..Default::default()
        })
        .unwrap();

        insta::assert_snapshot!(
            params.canonical_json(),
            @r#"{"a":"aac","br":"1500k","fps":30,"listSize":6,"res":"1280x720","segDur":2,"segmentType":"fmp4","src":"https://example.com/a.mp4","v":"h264"}"#
        );
    }

    #[test]
    fn omitted_fps_serializes_as_null() {
        let params = normalize(&raw("https://example.com/a.mp4")).unwrap();
        assert!(params.canonical_json().contains(r#""fps":null"#));
    }

    #[test]
    fn resolution_without_separator_uses_default() {
        assert_eq!(Resolution::parse("720p").unwrap(), DEFAULT_RESOLUTION);
        assert_eq!(
            Resolution::parse("640x360").unwrap(),
            Resolution { width: 640, height: 360 }
        );
    }

    #[test]
    fn malformed_resolution_is_rejected() {
        for bad in ["axb", "640x", "0x360", "1x2x3"] {
            let err = Resolution::parse(bad).unwrap_err();
            assert!(
                matches!(err, ParamError::InvalidField { field: "res", .. }),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn unknown_segment_type_falls_back_to_ts() {
        let mut request = raw("https://example.com/a.mp4");
        request.segment_type = Some("webm".to_string());
        assert_eq!(normalize(&request).unwrap().segment_type, SegmentType::Ts);

        request.segment_type = Some("FMP4".to_string());
        assert_eq!(normalize(&request).unwrap().segment_type, SegmentType::Fmp4);
    }

    #[test]
    fn segment_duration_and_list_size_are_floored() {
        let mut request = raw("https://example.com/a.mp4");
        request.seg_dur = Some("0".to_string());
        request.list_size = Some("-4".to_string());

        let params = normalize(&request).unwrap();
        assert_eq!(params.segment_duration, 1);
        assert_eq!(params.list_size, 2);
    }

    #[test]
    fn non_numeric_counts_are_rejected() {
        let mut request = raw("https://example.com/a.mp4");
        request.seg_dur = Some("two".to_string());
        assert!(matches!(
            normalize(&request),
            Err(ParamError::InvalidField { field: "segDur", .. })
        ));
    }

    #[test]
    fn fps_is_truncated_to_integer() {
        let mut request = raw("https://example.com/a.mp4");
        request.fps = Some("29.97".to_string());
        assert_eq!(normalize(&request).unwrap().fps, Some(29));

        request.fps = Some("fast".to_string());
        assert!(matches!(
            normalize(&request),
            Err(ParamError::InvalidField { field: "fps", .. })
        ));
    }

    #[test]
    fn bitrate_keeps_its_casing() {
        let mut request = raw("https://example.com/a.mp4");
        request.br = Some("2M".to_string());
        assert_eq!(normalize(&request).unwrap().bitrate, "2M");
    }
}
