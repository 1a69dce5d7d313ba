//! Renderer client: one call per (document, page, scale), no caching

use std::ffi::OsString;
use std::process::{Command, Stdio};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::error::RenderError;
use super::types::{DocumentHandle, PagePayload};

/// Resolution the backend renders at for scale 1.0
pub const BASE_DPI: f32 = 150.0;

/// Anything that can turn a page into an encoded image.
///
/// Implementations must be idempotent and leave the document untouched;
/// the scheduler may call them from several worker threads at once.
pub trait PageRenderer: Send + Sync {
    fn render(&self, document: &DocumentHandle, page: usize, scale: f32)
    -> Result<Vec<u8>, RenderError>;
}

impl<F> PageRenderer for F
where
    F: Fn(&DocumentHandle, usize, f32) -> Result<Vec<u8>, RenderError> + Send + Sync,
{
    fn render(
        &self,
        document: &DocumentHandle,
        page: usize,
        scale: f32,
    ) -> Result<Vec<u8>, RenderError> {
        self(document, page, scale)
    }
}

/// Renders by running an external program once per page.
///
/// Arguments may contain the placeholders `{path}`, `{page}`, `{scale}` and
/// `{dpi}`. The program's stdout is the image (raw bytes or a base64 data
/// URL); a non-zero exit status is a render failure.
#[derive(Clone, Debug)]
pub struct CommandRenderer {
    program: OsString,
    args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<OsString>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn expand(&self, document: &DocumentHandle, page: usize, scale: f32) -> Vec<OsString> {
        let path = document.path().to_string_lossy();
        let page = page.to_string();
        let scale_text = format!("{scale:.1}");
        let dpi = format!("{:.0}", scale * BASE_DPI);

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{path}", &path)
                    .replace("{page}", &page)
                    .replace("{scale}", &scale_text)
                    .replace("{dpi}", &dpi)
                    .into()
            })
            .collect()
    }
}

impl PageRenderer for CommandRenderer {
    fn render(
        &self,
        document: &DocumentHandle,
        page: usize,
        scale: f32,
    ) -> Result<Vec<u8>, RenderError> {
        let output = Command::new(&self.program)
            .args(self.expand(document, page, scale))
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::backend(format!(
                "{} exited with {}: {}",
                self.program.to_string_lossy(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

/// Turn renderer output into a payload, unwrapping `data:...;base64,` URLs
pub fn decode_payload(raw: Vec<u8>) -> Result<PagePayload, RenderError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(RenderError::EmptyOutput);
    }

    if !raw.starts_with(b"data:") {
        return Ok(PagePayload::new(raw));
    }

    let comma = raw
        .iter()
        .position(|&b| b == b',')
        .ok_or_else(|| RenderError::decode("data URL without ','"))?;
    let header = std::str::from_utf8(&raw[5..comma])
        .map_err(|_| RenderError::decode("data URL header is not UTF-8"))?;
    let Some(mime) = header.strip_suffix(";base64") else {
        return Err(RenderError::decode(format!(
            "unsupported data URL encoding: {header}"
        )));
    };

    let body = raw[comma + 1..].trim_ascii();
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| RenderError::decode(e.to_string()))?;
    if bytes.is_empty() {
        return Err(RenderError::EmptyOutput);
    }

    Ok(PagePayload::with_mime(bytes, mime))
}
