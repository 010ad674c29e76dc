//! Module specifier classification and package-name helpers.

/// How an import specifier is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
    /// `./x` or `../x`.
    Relative,
    /// `/x`: an absolute path on the serving origin.
    RootAbsolute,
    /// `https://…`, `data:…` and other scheme-qualified URLs.
    Url,
    /// Anything else: resolved through package lookup.
    Bare,
}

/// Classify a module specifier.
pub fn classify(specifier: &str) -> SpecifierKind {
    if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." || specifier == ".." {
        SpecifierKind::Relative
    } else if specifier.starts_with('/') {
        SpecifierKind::RootAbsolute
    } else if has_scheme(specifier) {
        SpecifierKind::Url
    } else {
        SpecifierKind::Bare
    }
}

/// `true` for `scheme:` prefixes such as `https:`, `data:`, `node:`.
///
/// A scheme is an ASCII letter followed by letters, digits, `+`, `-` or `.`.
/// Scoped package names (`@scope/x`) never match because `@` is not a letter.
fn has_scheme(specifier: &str) -> bool {
    let Some((scheme, _)) = specifier.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Split a bare specifier into its package name and the subpath within it.
///
/// `pkg` → (`pkg`, None), `pkg/a/b` → (`pkg`, Some(`a/b`)),
/// `@scope/pkg/a` → (`@scope/pkg`, Some(`a`)).
pub fn split_package(specifier: &str) -> (&str, Option<&str>) {
    let name_end = if specifier.starts_with('@') {
        match specifier.find('/') {
            Some(first) => specifier[first + 1..]
                .find('/')
                .map(|second| first + 1 + second),
            None => None,
        }
    } else {
        specifier.find('/')
    };

    match name_end {
        Some(end) => {
            let sub = &specifier[end + 1..];
            (&specifier[..end], (!sub.is_empty()).then_some(sub))
        }
        None => (specifier, None),
    }
}

/// The package name of a bare specifier.
pub fn package_name(specifier: &str) -> &str {
    split_package(specifier).0
}

/// Check that a vendor specifier taken from a request path is safe to look
/// up: non-empty segments, no `.`/`..` segments, no backslashes or NULs, and
/// a well-formed package name.
pub fn is_valid_vendor_specifier(specifier: &str) -> bool {
    if specifier.is_empty()
        || specifier.contains('\\')
        || specifier.contains('\0')
        || classify(specifier) != SpecifierKind::Bare
    {
        return false;
    }
    if specifier
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return false;
    }

    let name = package_name(specifier);
    match name.strip_prefix('@') {
        Some(scoped) => scoped.split('/').count() == 2,
        None => !name.starts_with('.'),
    }
}

/// Encode a specifier as a single flat file name. Reversible through
/// [`unsanitize`].
pub fn sanitize(specifier: &str) -> String {
    specifier.replace('%', "%25").replace('/', "%2F")
}

/// Inverse of [`sanitize`].
pub fn unsanitize(file_stem: &str) -> String {
    file_stem.replace("%2F", "/").replace("%25", "%")
}
