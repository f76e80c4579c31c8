//! Intent resolution: classifying an inbound exchange.

use crate::request::Request;
use http::Method;
use stowage_core::headers;
use stowage_storage::StoreCapabilities;

/// The classified purpose of an inbound exchange.
///
/// Variants carrying a `String` hold the raw resource-id URL segment; the
/// engine parses it, answering 404 for ids that cannot exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    CreateFile,
    WriteFile(String),
    GetFileInfo(String),
    GetOptions,
    DeleteFile(String),
    ConcatenateFiles,
    /// Not a protocol request; pass it through untouched.
    NotApplicable,
}

/// Split `path` against the configured base path.
///
/// Returns `Some(None)` for the base itself, `Some(Some(segment))` for one
/// trailing segment, and `None` for anything else.
fn match_path<'a>(path: &'a str, base: &str) -> Option<Option<&'a str>> {
    let base = base.trim_end_matches('/');
    let path = path.trim_end_matches('/');
    if path == base {
        return Some(None);
    }
    let rest = path.strip_prefix(base)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(Some(rest))
}

/// Classify one exchange.
///
/// OPTIONS needs no version header; every other method requires the version
/// header to be present (its value is checked later, answering 412 when it
/// differs). POST and OPTIONS address the base URL; HEAD, PATCH and DELETE
/// address a resource id.
pub fn resolve(request: &Request, base_path: &str, capabilities: &StoreCapabilities) -> Intent {
    let method = request.effective_method();
    let Some(segment) = match_path(&request.path, base_path) else {
        return Intent::NotApplicable;
    };

    if method == Method::OPTIONS {
        return match segment {
            None => Intent::GetOptions,
            Some(_) => Intent::NotApplicable,
        };
    }

    // Absence of the version header means this exchange is not for us.
    if request.header(headers::TUS_RESUMABLE).is_none() {
        return Intent::NotApplicable;
    }

    match (method, segment) {
        (Method::POST, None) => {
            if capabilities.concatenation && request.header(headers::UPLOAD_CONCAT).is_some() {
                Intent::ConcatenateFiles
            } else {
                Intent::CreateFile
            }
        }
        (Method::HEAD, Some(id)) => Intent::GetFileInfo(id.to_string()),
        (Method::PATCH, Some(id)) => Intent::WriteFile(id.to_string()),
        (Method::DELETE, Some(id)) => {
            if capabilities.termination {
                Intent::DeleteFile(id.to_string())
            } else {
                Intent::NotApplicable
            }
        }
        _ => Intent::NotApplicable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::PROTOCOL_VERSION;

    const BASE: &str = "/files";

    fn caps() -> StoreCapabilities {
        StoreCapabilities::full()
    }

    fn versioned(method: Method, path: &str) -> Request {
        Request::new(method, path).with_header(headers::TUS_RESUMABLE, PROTOCOL_VERSION)
    }

    #[test]
    fn options_needs_no_version_header() {
        let req = Request::new(Method::OPTIONS, "/files");
        assert_eq!(resolve(&req, BASE, &caps()), Intent::GetOptions);
    }

    #[test]
    fn missing_version_header_is_not_applicable() {
        let req = Request::new(Method::POST, "/files");
        assert_eq!(resolve(&req, BASE, &caps()), Intent::NotApplicable);
    }

    #[test]
    fn post_on_base_creates() {
        let req = versioned(Method::POST, "/files");
        assert_eq!(resolve(&req, BASE, &caps()), Intent::CreateFile);
    }

    #[test]
    fn post_with_concat_header_concatenates_when_supported() {
        let req = versioned(Method::POST, "/files").with_header(headers::UPLOAD_CONCAT, "partial");
        assert_eq!(resolve(&req, BASE, &caps()), Intent::ConcatenateFiles);

        let req = versioned(Method::POST, "/files").with_header(headers::UPLOAD_CONCAT, "partial");
        let mut no_concat = caps();
        no_concat.concatenation = false;
        assert_eq!(resolve(&req, BASE, &no_concat), Intent::CreateFile);
    }

    #[test]
    fn id_methods_require_an_id_segment() {
        assert_eq!(
            resolve(&versioned(Method::HEAD, "/files/abc"), BASE, &caps()),
            Intent::GetFileInfo("abc".to_string())
        );
        assert_eq!(
            resolve(&versioned(Method::PATCH, "/files/abc"), BASE, &caps()),
            Intent::WriteFile("abc".to_string())
        );
        assert_eq!(
            resolve(&versioned(Method::PATCH, "/files"), BASE, &caps()),
            Intent::NotApplicable
        );
        assert_eq!(
            resolve(&versioned(Method::POST, "/files/abc"), BASE, &caps()),
            Intent::NotApplicable
        );
    }

    #[test]
    fn delete_requires_termination_support() {
        let req = versioned(Method::DELETE, "/files/abc");
        assert_eq!(
            resolve(&req, BASE, &caps()),
            Intent::DeleteFile("abc".to_string())
        );
        let mut no_term = caps();
        no_term.termination = false;
        let req = versioned(Method::DELETE, "/files/abc");
        assert_eq!(resolve(&req, BASE, &no_term), Intent::NotApplicable);
    }

    #[test]
    fn method_override_reclassifies() {
        let req = versioned(Method::POST, "/files/abc")
            .with_header(headers::METHOD_OVERRIDE, "DELETE");
        assert_eq!(
            resolve(&req, BASE, &caps()),
            Intent::DeleteFile("abc".to_string())
        );
    }

    #[test]
    fn foreign_paths_pass_through() {
        assert_eq!(
            resolve(&versioned(Method::PATCH, "/other/abc"), BASE, &caps()),
            Intent::NotApplicable
        );
        assert_eq!(
            resolve(&versioned(Method::PATCH, "/files/a/b"), BASE, &caps()),
            Intent::NotApplicable
        );
    }

    #[test]
    fn trailing_slashes_are_tolerated() {
        assert_eq!(
            resolve(&versioned(Method::POST, "/files/"), BASE, &caps()),
            Intent::CreateFile
        );
    }
}
