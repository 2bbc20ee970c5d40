use serde::{Deserialize, Serialize};

use crate::error::PathError;

const PREFIX_DELIM: char = '-';
const SEGMENT_DELIM: char = '_';

/// Where a documented field lives, taken from the attribute prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Query,
    Path,
    Header,
    /// Request body property.
    Body,
    /// Response body property.
    Object,
}

impl Location {
    pub fn parse(prefix: &str) -> Option<Self> {
        match prefix {
            "query" => Some(Location::Query),
            "path" => Some(Location::Path),
            "header" => Some(Location::Header),
            "body" => Some(Location::Body),
            "object" => Some(Location::Object),
            _ => None,
        }
    }

    pub fn as_prefix(&self) -> &'static str {
        match self {
            Location::Query => "query",
            Location::Path => "path",
            Location::Header => "header",
            Location::Body => "body",
            Location::Object => "object",
        }
    }

    /// Query, path and header fields become operation parameters.
    pub fn is_parameter(&self) -> bool {
        matches!(self, Location::Query | Location::Path | Location::Header)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Empty for an anonymous nested array level (`x_0_1`).
    pub name: String,
    pub array_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPath {
    pub location: Location,
    pub endpoint_id: String,
    /// First segment is the container. Never empty.
    pub segments: Vec<Segment>,
}

impl ParsedPath {
    pub fn container(&self) -> &str {
        &self.segments[0].name
    }

    pub fn leaf(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    /// Rebuild the delimiter-joined attribute string.
    pub fn to_attribute_path(&self) -> String {
        let mut out = format!("{}{}{}", self.location.as_prefix(), PREFIX_DELIM, self.endpoint_id);
        for seg in &self.segments {
            if !seg.name.is_empty() {
                out.push(SEGMENT_DELIM);
                out.push_str(&seg.name);
            }
            if let Some(idx) = seg.array_index {
                out.push(SEGMENT_DELIM);
                out.push_str(&idx.to_string());
            }
        }
        out
    }

    /// Merge a trailing run of unindexed segments that spells `display_name`
    /// (`asset`, `id` + "asset_id" → `asset_id`).
    pub fn coalesce_leaf(mut self, display_name: &str) -> Self {
        if !display_name.contains(SEGMENT_DELIM) {
            return self;
        }
        let run = self
            .segments
            .iter()
            .rev()
            .take_while(|s| s.array_index.is_none() && !s.name.is_empty())
            .count();
        for k in (2..=run).rev() {
            let start = self.segments.len() - k;
            let joined = self.segments[start..]
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join("_");
            if joined == display_name {
                self.segments.truncate(start);
                self.segments.push(Segment {
                    name: joined,
                    array_index: None,
                });
                break;
            }
        }
        self
    }
}

fn is_index(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// Tokenize `prefix-endpoint_container[_index]_prop1[_prop2...]`.
pub fn parse_path(raw: &str) -> Result<ParsedPath, PathError> {
    let malformed = |reason: &'static str| PathError::Malformed {
        path: raw.to_string(),
        reason,
    };

    let (prefix, rest) = raw
        .split_once(PREFIX_DELIM)
        .ok_or_else(|| malformed("fewer than three segments"))?;
    let location = Location::parse(prefix).ok_or_else(|| malformed("unknown location prefix"))?;

    let tokens: Vec<&str> = rest.split(SEGMENT_DELIM).collect();
    if tokens.len() < 2 {
        return Err(malformed("fewer than three segments"));
    }
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(malformed("empty segment"));
    }

    let endpoint_id = tokens[0].to_string();
    if is_index(tokens[1]) {
        return Err(malformed("container must be a name"));
    }

    let mut segments: Vec<Segment> = Vec::with_capacity(tokens.len() - 1);
    for token in &tokens[1..] {
        if is_index(token) {
            if token.len() > 1 && token.starts_with('0') {
                return Err(malformed("array index has a leading zero"));
            }
            let idx: u32 = token.parse().map_err(|_| malformed("array index out of range"))?;
            // an index always has a preceding segment: the container is a name
            let last = segments.len() - 1;
            if segments[last].array_index.is_none() {
                segments[last].array_index = Some(idx);
            } else {
                segments.push(Segment {
                    name: String::new(),
                    array_index: Some(idx),
                });
            }
        } else {
            segments.push(Segment {
                name: token.to_string(),
                array_index: None,
            });
        }
    }

    Ok(ParsedPath {
        location,
        endpoint_id,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(name: &str, idx: Option<u32>) -> Segment {
        Segment {
            name: name.to_string(),
            array_index: idx,
        }
    }

    #[test]
    fn query_parameter() {
        let p = parse_path("query-listAssets_limit").unwrap();
        assert_eq!(p.location, Location::Query);
        assert_eq!(p.endpoint_id, "listAssets");
        assert_eq!(p.container(), "limit");
        assert_eq!(p.segments, vec![seg("limit", None)]);
    }

    #[test]
    fn indexed_response_property() {
        let p = parse_path("object-dcLoss_data_0_device_3_timestamp").unwrap();
        assert_eq!(p.location, Location::Object);
        assert_eq!(p.container(), "data");
        assert_eq!(
            p.segments,
            vec![seg("data", Some(0)), seg("device", Some(3)), seg("timestamp", None)]
        );
    }

    #[test]
    fn consecutive_indices_open_anonymous_level() {
        let p = parse_path("object-grid_cells_0_1_value").unwrap();
        assert_eq!(
            p.segments,
            vec![seg("cells", Some(0)), seg("", Some(1)), seg("value", None)]
        );
        assert_eq!(p.to_attribute_path(), "object-grid_cells_0_1_value");
    }

    #[test]
    fn endpoint_may_contain_dashes() {
        let p = parse_path("object-get-assets_data_0_id").unwrap();
        assert_eq!(p.endpoint_id, "get-assets");
    }

    #[test]
    fn digit_test_is_purely_syntactic() {
        let p = parse_path("object-ep_data_v2_1x").unwrap();
        assert!(p.segments.iter().all(|s| s.array_index.is_none()));
        assert_eq!(p.segments.len(), 3);
    }

    #[test]
    fn too_few_segments() {
        assert!(matches!(parse_path("object-ep"), Err(PathError::Malformed { .. })));
        assert!(matches!(parse_path("object"), Err(PathError::Malformed { .. })));
        assert!(matches!(parse_path(""), Err(PathError::Malformed { .. })));
    }

    #[test]
    fn rejects_unknown_prefix_empty_tokens_and_index_container() {
        assert!(parse_path("cookie-ep_x").is_err());
        assert!(parse_path("object-ep__x").is_err());
        assert!(parse_path("object-ep_0_x").is_err());
        assert!(parse_path("object-ep_x_99999999999").is_err());
        assert!(parse_path("object-ep_x_01").is_err());
    }

    #[test]
    fn coalesce_joins_underscored_leaf() {
        let p = parse_path("object-ep_data_0_asset_id").unwrap().coalesce_leaf("asset_id");
        assert_eq!(p.segments, vec![seg("data", Some(0)), seg("asset_id", None)]);
        assert_eq!(p.to_attribute_path(), "object-ep_data_0_asset_id");

        let q = parse_path("query-ep_start_time").unwrap().coalesce_leaf("start_time");
        assert_eq!(q.segments, vec![seg("start_time", None)]);
    }

    #[test]
    fn coalesce_leaves_nested_objects_alone() {
        let p = parse_path("object-ep_data_0_owner_name").unwrap().coalesce_leaf("name");
        assert_eq!(
            p.segments,
            vec![seg("data", Some(0)), seg("owner", None), seg("name", None)]
        );
        // does not reach across an index
        let q = parse_path("object-ep_data_0_x").unwrap().coalesce_leaf("data_0_x");
        assert_eq!(q.segments.len(), 2);
    }

    /// Linear congruential generator for repeatable path samples.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
            items[(self.next() as usize) % items.len()]
        }
    }

    #[test]
    fn roundtrip_generated_paths() {
        let prefixes = ["query", "path", "header", "body", "object"];
        let endpoints = ["dcLoss", "list-assets", "getV2", "x"];
        let names = ["data", "query", "id", "value", "asset", "ts", "v2", "a1b"];
        let mut rng = Lcg(0x5eed);

        for _ in 0..2000 {
            let mut raw = format!("{}-{}", rng.pick(&prefixes), rng.pick(&endpoints));
            raw.push('_');
            raw.push_str(rng.pick(&names));
            let extra = rng.next() % 6;
            for _ in 0..extra {
                raw.push('_');
                if rng.next() % 3 == 0 {
                    raw.push_str(&(rng.next() % 12).to_string());
                } else {
                    raw.push_str(rng.pick(&names));
                }
            }
            let parsed = parse_path(&raw).unwrap_or_else(|e| panic!("{}: {}", raw, e));
            assert!(!parsed.segments.is_empty());
            assert_eq!(parsed.to_attribute_path(), raw);
        }
    }
}
