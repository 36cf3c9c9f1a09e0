use cdn_edge_error::{make_input_err, Error};

/// A sanitized `(bucket, path)` pair identifying an object in either store.
///
/// Bucket names must satisfy DNS-label rules; object paths are UTF-8,
/// forward-slash separated, and have leading/trailing slashes trimmed and
/// path-traversal segments rejected before any store call is made.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub bucket: String,
    pub path: String,
}

impl ObjectKey {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Result<Self, Error> {
        let bucket = bucket.into();
        validate_bucket_name(&bucket)?;
        let path = sanitize_object_path(&path.into())?;
        Ok(ObjectKey { bucket, path })
    }

    /// The fingerprint used to key a resize result in the cache, per the
    /// `resize:{bucket}:{path}:{w}:{h}` scheme.
    pub fn resize_fingerprint(&self, width: u32, height: u32) -> String {
        format!("resize:{}:{}:{}:{}", self.bucket, self.path, width, height)
    }
}

fn validate_bucket_name(bucket: &str) -> Result<(), Error> {
    if bucket.is_empty() || bucket.len() > 63 {
        return Err(make_input_err!("bucket name must be 1-63 characters: {bucket}"));
    }
    let valid = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && !bucket.starts_with('-')
        && !bucket.ends_with('-');
    if !valid {
        return Err(make_input_err!(
            "bucket name must be a valid DNS label: {bucket}"
        ));
    }
    Ok(())
}

/// Trims leading/trailing slashes and rejects `.`/`..` traversal segments.
pub fn sanitize_object_path(path: &str) -> Result<String, Error> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(make_input_err!("object path must not be empty"));
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(make_input_err!("object path contains an invalid segment: {path}"));
        }
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn trims_leading_and_trailing_slashes() {
        assert_eq!(sanitize_object_path("/a/b/c/").unwrap(), "a/b/c");
    }

    #[test]
    fn rejects_traversal_segments() {
        assert!(sanitize_object_path("../etc/passwd").is_err());
        assert!(sanitize_object_path("a/../b").is_err());
    }

    #[test]
    fn builds_resize_fingerprint() {
        let key = ObjectKey::new("img", "a.jpg").unwrap();
        assert_eq!(key.resize_fingerprint(300, 200), "resize:img:a.jpg:300:200");
    }

    #[test]
    fn rejects_bad_bucket_names() {
        assert!(ObjectKey::new("Invalid_Bucket", "a").is_err());
        assert!(ObjectKey::new("-leading-dash", "a").is_err());
        assert!(ObjectKey::new("ok-bucket", "a").is_ok());
    }
}
