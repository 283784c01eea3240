//! Browser-facing pages
//!
//! The localized homepage is an external collaborator; this module holds
//! the seam it plugs into plus a minimal built-in implementation used
//! when no localized UI is wired in.

/// Pages served to real browsers hitting the reseed host.
///
/// `home_page` receives a freshly issued one-time token to embed in the
/// reseed form; `asset` resolves the static paths of the browse surface.
pub trait BrowserUi: Send + Sync {
    fn home_page(&self, token: &str) -> String;

    /// Content type and body for a static asset path, if served.
    fn asset(&self, path: &str) -> Option<(&'static str, Vec<u8>)>;
}

/// Built-in plain homepage.
#[derive(Default)]
pub struct DefaultUi;

impl BrowserUi for DefaultUi {
    fn home_page(&self, token: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Reseed Server</title>
<link rel="stylesheet" href="/style.css">
</head>
<body>
<h1>Reseed Server</h1>
<p>This service bootstraps new routers with a signed bundle of peers.</p>
<form method="post" action="/i2pseeds">
<input type="hidden" name="onetime" value="{}">
<button type="submit">Download reseed bundle</button>
</form>
</body>
</html>
"#,
            token
        )
    }

    fn asset(&self, path: &str) -> Option<(&'static str, Vec<u8>)> {
        match path {
            "/style.css" => Some((
                "text/css",
                b"body{font-family:sans-serif;margin:3em auto;max-width:40em}".to_vec(),
            )),
            "/ping" => Some(("text/plain", b"pong".to_vec())),
            _ => None,
        }
    }
}
