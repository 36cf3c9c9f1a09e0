// Copyright 2024 The CDN Edge Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `GetWidthAndHeight`, modeled as a tagged union per `spec.md` §9: the
//! source a request's width/height comes from (URL path segments, multipart
//! form fields, or HTTP headers) is a closed set of three shapes, not an
//! open-ended polymorphic lookup.

use std::collections::HashMap;

use cdn_edge_transform::TransformDescriptor;

/// The three input sources the original dispatched over dynamically.
pub enum DimensionSource<'a> {
    /// `w:{n}/h:{n}/` path prefix segments on the GET transform route.
    PathParams { width: Option<&'a str>, height: Option<&'a str> },
    /// `width`/`height` multipart fields on `/upload` and `/resize`.
    FormFields(&'a HashMap<String, String>),
    /// `X-Width`/`X-Height` headers, for callers that prefer not to touch
    /// the body (e.g. a HEAD-style probe ahead of a real upload).
    Headers(&'a axum::http::HeaderMap),
}

fn parse_u32(value: &str) -> Option<u32> {
    value.parse::<u32>().ok()
}

/// `w:0`/`h:0` on the path-prefix form mean "derive from aspect ratio", per
/// `spec.md` §4.4 step 2 — zero is the path vocabulary's spelling of "unset".
fn parse_path_dimension(value: &str) -> Option<u32> {
    parse_u32(value).filter(|&n| n > 0)
}

impl DimensionSource<'_> {
    pub fn resolve(&self) -> TransformDescriptor {
        match self {
            DimensionSource::PathParams { width, height } => TransformDescriptor {
                width: width.and_then(|w| parse_path_dimension(w)),
                height: height.and_then(|h| parse_path_dimension(h)),
            },
            DimensionSource::FormFields(fields) => TransformDescriptor {
                width: fields.get("width").and_then(|w| parse_u32(w)),
                height: fields.get("height").and_then(|h| parse_u32(h)),
            },
            DimensionSource::Headers(headers) => TransformDescriptor {
                width: headers
                    .get("x-width")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_u32),
                height: headers
                    .get("x-height")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_u32),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resolves_from_path_params() {
        let source = DimensionSource::PathParams {
            width: Some("300"),
            height: None,
        };
        let descriptor = source.resolve();
        assert_eq!(descriptor.width, Some(300));
        assert_eq!(descriptor.height, None);
    }

    #[test]
    fn resolves_from_form_fields() {
        let mut fields = HashMap::new();
        fields.insert("width".to_string(), "100".to_string());
        fields.insert("height".to_string(), "50".to_string());
        let descriptor = DimensionSource::FormFields(&fields).resolve();
        assert_eq!(descriptor.width, Some(100));
        assert_eq!(descriptor.height, Some(50));
    }

    #[test]
    fn ignores_unparsable_values() {
        let source = DimensionSource::PathParams {
            width: Some("not-a-number"),
            height: Some("300"),
        };
        let descriptor = source.resolve();
        assert_eq!(descriptor.width, None);
        assert_eq!(descriptor.height, Some(300));
    }

    #[test]
    fn zero_path_dimension_means_derive() {
        let source = DimensionSource::PathParams {
            width: Some("300"),
            height: Some("0"),
        };
        let descriptor = source.resolve();
        assert_eq!(descriptor.width, Some(300));
        assert_eq!(descriptor.height, None);
    }
}
