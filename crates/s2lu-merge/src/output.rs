//! Output keys.

use crate::SceneId;

/// Extension of the derived raster.
pub const RASTER_EXTENSION: &str = "tif";
/// Extension of the summary sidecar.
pub const SUMMARY_EXTENSION: &str = "json";

/// Storage key `{prefix}/{scene_id}.{extension}`.
///
/// Leading and trailing slashes on the prefix are ignored; an empty prefix
/// puts the object at the store root.
pub fn output_key(prefix: &str, scene_id: &SceneId, extension: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}.{}", scene_id, extension)
    } else {
        format!("{}/{}.{}", prefix, scene_id, extension)
    }
}

/// What an invocation wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLocation {
    pub scene_id: SceneId,
    /// Key of the derived raster.
    pub raster_key: String,
    /// Key of the summary sidecar, if one was written.
    pub summary_key: Option<String>,
}

impl OutputLocation {
    /// Keys for `scene_id` under `prefix`.
    pub fn new(prefix: &str, scene_id: SceneId, with_summary: bool) -> Self {
        Self {
            raster_key: output_key(prefix, &scene_id, RASTER_EXTENSION),
            summary_key: with_summary.then(|| output_key(prefix, &scene_id, SUMMARY_EXTENSION)),
            scene_id,
        }
    }
}

impl std::fmt::Display for OutputLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raster_key)?;
        if let Some(summary) = &self.summary_key {
            write!(f, " (+ {})", summary)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> SceneId {
        "T30TXM_20240101".parse().unwrap()
    }

    #[test]
    fn test_output_key() {
        assert_eq!(
            output_key("output", &scene(), RASTER_EXTENSION),
            "output/T30TXM_20240101.tif"
        );
        assert_eq!(
            output_key("/landuse/s2/", &scene(), SUMMARY_EXTENSION),
            "landuse/s2/T30TXM_20240101.json"
        );
        assert_eq!(output_key("", &scene(), "tif"), "T30TXM_20240101.tif");
    }

    #[test]
    fn test_output_location() {
        let location = OutputLocation::new("output", scene(), true);
        assert_eq!(location.raster_key, "output/T30TXM_20240101.tif");
        assert_eq!(
            location.summary_key.as_deref(),
            Some("output/T30TXM_20240101.json")
        );
        assert_eq!(
            location.to_string(),
            "output/T30TXM_20240101.tif (+ output/T30TXM_20240101.json)"
        );

        assert_eq!(OutputLocation::new("output", scene(), false).summary_key, None);
    }
}
