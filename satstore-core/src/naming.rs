/*!
Deterministic output paths for raster artifacts.

Paths come either from the default layout

```text
{satellite}/{year}/{formatDir}/{satellite}_{date}_{bandLabel}[_{identifier}].{ext}
```

or from a custom template made of `{variable}` placeholders. Templates are
parsed once and rendered against a per-artifact [`NamingContext`]; a render
that cannot resolve every placeholder fails as a whole.
*/

use crate::format::OutputFormat;
use crate::{Result, SatStoreError};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Identifier used when the caller supplied none; omitted from default names
pub const GENERIC_IDENTIFIER: &str = "area";

/// Variables every naming context provides
pub const STANDARD_VARIABLES: [&str; 8] = [
    "datetime",
    "date",
    "bandId",
    "areaName",
    "satellite",
    "fileType",
    "provider",
    "identifierType",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed custom naming template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl NamingTemplate {
    /// Parse a template string
    ///
    /// `{{` and `}}` produce literal braces.
    ///
    /// # Errors
    /// * `SatStoreError::NamingTemplate` - unbalanced braces or a malformed placeholder
    ///
    /// # Example
    /// ```rust
    /// use satstore_core::NamingTemplate;
    ///
    /// let template = NamingTemplate::parse("{areaName}_{date}_custom.{fileType}")?;
    /// assert_eq!(template.variables().collect::<Vec<_>>(), ["areaName", "date", "fileType"]);
    /// # Ok::<(), satstore_core::SatStoreError>(())
    /// ```
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(SatStoreError::naming_template(format!(
                            "unclosed '{{' at position {pos} in '{source}'"
                        )));
                    }
                    if !is_identifier(&name) {
                        return Err(SatStoreError::naming_template(format!(
                            "invalid placeholder '{{{name}}}' in '{source}'"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(name));
                }
                '}' => {
                    return Err(SatStoreError::naming_template(format!(
                        "unmatched '}}' at position {pos} in '{source}'"
                    )));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Check every placeholder against the standard variables plus `extra_keys`
    pub fn validate_variables<'k, I>(&self, extra_keys: I) -> Result<()>
    where
        I: IntoIterator<Item = &'k str>,
    {
        let extra: Vec<&str> = extra_keys.into_iter().collect();
        let unknown: Vec<&str> = self
            .variables()
            .filter(|v| !STANDARD_VARIABLES.contains(v) && !extra.contains(v))
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(SatStoreError::naming_template(format!(
                "template '{}' references unknown variable(s): {}",
                self.source,
                unknown.join(", ")
            )))
        }
    }

    /// Substitute every placeholder from `context`
    ///
    /// Either every placeholder resolves or nothing is returned.
    pub fn render(&self, context: &NamingContext) -> Result<String> {
        let missing: Vec<&str> = self
            .variables()
            .filter(|v| context.get(v).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(SatStoreError::naming_template(format!(
                "template '{}' has unresolved variable(s): {}",
                self.source,
                missing.join(", ")
            )));
        }

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => out.push_str(context.get(name).unwrap_or_default()),
            }
        }
        Ok(out)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Template variables available for one artifact/band
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingContext {
    values: BTreeMap<String, String>,
}

impl NamingContext {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Inputs for resolving one artifact path
#[derive(Debug, Clone, Copy)]
pub struct NamingRequest<'a> {
    pub datetime: &'a str,
    pub band_label: &'a str,
    pub identifier: Option<&'a str>,
    pub satellite: &'a str,
    pub provider: &'a str,
    pub format: OutputFormat,
    pub identifier_type: &'a str,
    pub extra: &'a BTreeMap<String, String>,
}

/// Outcome of naming an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Path relative to the output root
    Resolved(PathBuf),
    /// The artifact must not be written; not an error
    Skip { reason: String },
}

/// Builds output paths from artifact metadata
#[derive(Debug, Clone, Default)]
pub struct NamingResolver {
    template: Option<NamingTemplate>,
}

impl NamingResolver {
    /// Resolver using the default layout
    pub fn new() -> Self {
        Self { template: None }
    }

    /// Resolver using a custom template
    pub fn with_template(template: NamingTemplate) -> Self {
        Self {
            template: Some(template),
        }
    }

    pub fn template(&self) -> Option<&NamingTemplate> {
        self.template.as_ref()
    }

    /// Resolve the relative path for one artifact
    ///
    /// # Returns
    /// `Resolution::Skip` for an empty or `nan` datetime, otherwise the path
    ///
    /// # Errors
    /// * `SatStoreError::NamingTemplate` - the custom template cannot be fully rendered
    pub fn resolve(&self, request: &NamingRequest<'_>) -> Result<Resolution> {
        let datetime = request.datetime.trim();
        if datetime.is_empty() || datetime.eq_ignore_ascii_case("nan") {
            return Ok(Resolution::Skip {
                reason: format!("invalid acquisition datetime '{}'", request.datetime),
            });
        }

        let date = date_part(datetime);
        let context = build_context(request, datetime, date);

        let relative = match &self.template {
            Some(template) => {
                let rendered = template.render(&context)?;
                let path = PathBuf::from(&rendered);
                check_relative(&path, &rendered)?;
                debug!(path = %rendered, "Using custom naming");
                path
            }
            None => {
                let path = default_path(request, date)?;
                debug!(path = %path.display(), "Using default naming");
                path
            }
        };

        Ok(Resolution::Resolved(relative))
    }
}

/// Everything before the time separator (`T` or a space)
fn date_part(datetime: &str) -> &str {
    datetime
        .split(|c| c == 'T' || c == ' ')
        .next()
        .unwrap_or(datetime)
}

fn effective_identifier(identifier: Option<&str>) -> &str {
    match identifier.map(str::trim) {
        Some(id) if !id.is_empty() => id,
        _ => GENERIC_IDENTIFIER,
    }
}

fn build_context(request: &NamingRequest<'_>, datetime: &str, date: &str) -> NamingContext {
    let mut context = NamingContext::default();
    for (key, value) in request.extra {
        context.insert(key.clone(), value.clone());
    }
    context.insert("datetime", datetime);
    context.insert("date", date);
    context.insert("bandId", request.band_label);
    context.insert("areaName", effective_identifier(request.identifier));
    context.insert("satellite", request.satellite);
    context.insert("fileType", request.format.extension());
    context.insert("provider", request.provider);
    context.insert("identifierType", request.identifier_type);
    context
}

fn default_path(request: &NamingRequest<'_>, date: &str) -> Result<PathBuf> {
    let identifier = effective_identifier(request.identifier);
    check_segment("satellite", request.satellite)?;
    check_segment("date", date)?;
    check_segment("band label", request.band_label)?;
    check_segment("identifier", identifier)?;

    let ext = request.format.extension();
    let file_name = if identifier == GENERIC_IDENTIFIER {
        format!("{}_{}_{}.{}", request.satellite, date, request.band_label, ext)
    } else {
        format!(
            "{}_{}_{}_{}.{}",
            request.satellite, date, request.band_label, identifier, ext
        )
    };
    let year: String = date.chars().take(4).collect();

    let path = PathBuf::from(request.satellite)
        .join(year)
        .join(request.format.directory())
        .join(&file_name);
    check_relative(&path, &file_name)?;
    Ok(path)
}

/// A value placed into one path component of the default layout
fn check_segment(name: &str, value: &str) -> Result<()> {
    if value.contains(&['/', '\\', '\0'][..]) || value == "." || value == ".." {
        return Err(SatStoreError::naming_template(format!(
            "{name} '{value}' cannot be used in a file name"
        )));
    }
    Ok(())
}

fn check_relative(path: &Path, rendered: &str) -> Result<()> {
    if rendered.trim().is_empty() {
        return Err(SatStoreError::naming_template("template rendered an empty path"));
    }
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(SatStoreError::naming_template(format!(
            "rendered path '{rendered}' must stay inside the output directory"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(extra: &'a BTreeMap<String, String>) -> NamingRequest<'a> {
        NamingRequest {
            datetime: "2024-06-02T10:30:31.024000000",
            band_label: "B04",
            identifier: Some("copenhagen"),
            satellite: "S2MPC",
            provider: "MPC",
            format: OutputFormat::Raster,
            identifier_type: "area_name",
            extra,
        }
    }

    fn resolved(resolution: Resolution) -> PathBuf {
        match resolution {
            Resolution::Resolved(path) => path,
            Resolution::Skip { reason } => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn test_default_layout_with_identifier() {
        let extra = BTreeMap::new();
        let path = resolved(NamingResolver::new().resolve(&request(&extra)).unwrap());
        assert_eq!(
            path,
            PathBuf::from("S2MPC/2024/tiff/S2MPC_2024-06-02_B04_copenhagen.tif")
        );
    }

    #[test]
    fn test_default_layout_omits_generic_identifier() {
        let extra = BTreeMap::new();
        for identifier in [None, Some(""), Some(GENERIC_IDENTIFIER)] {
            let mut req = request(&extra);
            req.identifier = identifier;
            req.format = OutputFormat::Array;
            let path = resolved(NamingResolver::new().resolve(&req).unwrap());
            assert_eq!(path, PathBuf::from("S2MPC/2024/npy/S2MPC_2024-06-02_B04.npy"));
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let extra = BTreeMap::new();
        let resolver = NamingResolver::new();
        let first = resolver.resolve(&request(&extra)).unwrap();
        let second = resolver.resolve(&request(&extra)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_template_substitution() {
        let extra = BTreeMap::new();
        let template = NamingTemplate::parse("{areaName}_{date}_custom.{fileType}").unwrap();
        let mut req = request(&extra);
        req.identifier = Some("x");
        let path = resolved(NamingResolver::with_template(template).resolve(&req).unwrap());
        assert_eq!(path, PathBuf::from("x_2024-06-02_custom.tif"));
    }

    #[test]
    fn test_custom_template_with_extra_fields() {
        let mut extra = BTreeMap::new();
        extra.insert("tile".to_string(), "33UUB".to_string());
        let template =
            NamingTemplate::parse("{provider}/{tile}/{bandId}_{identifierType}.{fileType}").unwrap();
        let path = resolved(NamingResolver::with_template(template).resolve(&request(&extra)).unwrap());
        assert_eq!(path, PathBuf::from("MPC/33UUB/B04_area_name.tif"));
    }

    #[test]
    fn test_unresolved_variable_fails_without_partial_output() {
        let extra = BTreeMap::new();
        let template = NamingTemplate::parse("{areaName}_{tile}_{cloud}.tif").unwrap();
        let err = NamingResolver::with_template(template)
            .resolve(&request(&extra))
            .unwrap_err();

        match err {
            SatStoreError::NamingTemplate(msg) => {
                assert!(msg.contains("tile"));
                assert!(msg.contains("cloud"));
            }
            other => panic!("expected naming template error, got {other:?}"),
        }
    }

    #[test]
    fn test_nan_datetime_is_skipped() {
        let extra = BTreeMap::new();
        for datetime in ["nan", "NaN", "NAN", "", "  "] {
            let mut req = request(&extra);
            req.datetime = datetime;
            let resolution = NamingResolver::new().resolve(&req).unwrap();
            assert!(matches!(resolution, Resolution::Skip { .. }), "{datetime:?}");
        }
    }

    #[test]
    fn test_space_separated_datetime() {
        let extra = BTreeMap::new();
        let mut req = request(&extra);
        req.datetime = "2023-12-31 23:59:59";
        req.identifier = None;
        let path = resolved(NamingResolver::new().resolve(&req).unwrap());
        assert_eq!(path, PathBuf::from("S2MPC/2023/tiff/S2MPC_2023-12-31_B04.tif"));
    }

    #[test]
    fn test_parse_escaped_braces() {
        let template = NamingTemplate::parse("{{literal}}_{date}").unwrap();
        assert_eq!(template.variables().collect::<Vec<_>>(), ["date"]);

        let mut context = NamingContext::default();
        context.insert("date", "2024-06-02");
        assert_eq!(template.render(&context).unwrap(), "{literal}_2024-06-02");
    }

    #[test]
    fn test_parse_rejects_malformed_templates() {
        for source in ["{date", "date}", "{}", "{1abc}", "{band id}"] {
            assert!(
                matches!(NamingTemplate::parse(source), Err(SatStoreError::NamingTemplate(_))),
                "{source}"
            );
        }
    }

    #[test]
    fn test_validate_variables_against_whitelist() {
        let template = NamingTemplate::parse("{satellite}_{tile}.{fileType}").unwrap();
        assert!(template.validate_variables(std::iter::empty()).is_err());
        assert!(template.validate_variables(["tile"]).is_ok());
    }

    #[test]
    fn test_default_layout_rejects_path_separators() {
        let extra = BTreeMap::new();
        let escaping = [
            ("identifier", "x/../../../../../escaped"),
            ("identifier", "a\\b"),
            ("satellite", ".."),
            ("satellite", "/etc"),
            ("band", "../B04"),
        ];
        for (field, value) in escaping {
            let mut req = request(&extra);
            match field {
                "identifier" => req.identifier = Some(value),
                "satellite" => req.satellite = value,
                _ => req.band_label = value,
            }
            let result = NamingResolver::new().resolve(&req);
            assert!(
                matches!(result, Err(SatStoreError::NamingTemplate(_))),
                "{field} = {value:?}"
            );
        }

        let mut req = request(&extra);
        req.datetime = "2024/06/02";
        assert!(NamingResolver::new().resolve(&req).is_err());
    }

    #[test]
    fn test_rendered_path_must_stay_relative() {
        let extra = BTreeMap::new();
        for source in ["/abs/{date}.tif", "../{date}.tif"] {
            let template = NamingTemplate::parse(source).unwrap();
            let result = NamingResolver::with_template(template).resolve(&request(&extra));
            assert!(matches!(result, Err(SatStoreError::NamingTemplate(_))), "{source}");
        }
    }
}
