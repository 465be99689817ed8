//! Where upstream histograms live.
//!
//! Paths are rendered from templates with `{name}` placeholders. Unknown
//! placeholders are rejected when the run configuration is resolved.

use std::path::PathBuf;

use ltt_core::{Error, Result};
use ltt_hist::HistogramPath;
use serde::{Deserialize, Serialize};

use crate::catalog::{NOMINAL, Variation, VariationKind};

/// Placeholders understood by [`InputLayout`] templates.
pub const PLACEHOLDERS: [&str; 9] = [
    "period",
    "channel",
    "variation",
    "sample",
    "tagger",
    "wp",
    "region",
    "interval",
    "fit_variable",
];

/// Sample name of observed data.
pub const DATA_SAMPLE: &str = "DATA";

/// Path templates of the upstream histogram files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLayout {
    /// Directory the rendered file paths are relative to.
    pub base_dir: PathBuf,
    /// File of one sample in one variation.
    pub file_template: String,
    /// Directory inside the file.
    pub directory_template: String,
    /// Histogram name for nominal and shape variations.
    pub name_template: String,
    /// Histogram name for weight variations (stored in the nominal file).
    pub weight_name_template: String,
}

impl Default for InputLayout {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("histograms"),
            file_template: "{period}/{channel}/{variation}/{sample}.json".into(),
            directory_template: "{tagger}_{wp}_{region}_{interval}".into(),
            name_template: "{fit_variable}".into(),
            weight_name_template: "{fit_variable}_{variation}".into(),
        }
    }
}

/// Values substituted into the templates for one fit channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutFields {
    /// Period name.
    pub period: String,
    /// Detection channel name.
    pub channel: String,
    /// Tagger name.
    pub tagger: String,
    /// Working point name.
    pub wp: String,
    /// Region name.
    pub region: String,
    /// Interval name.
    pub interval: String,
    /// Fit variable name.
    pub fit_variable: String,
}

impl InputLayout {
    /// Reject templates with unknown or unbalanced placeholders.
    pub fn validate(&self) -> Result<()> {
        for (what, template) in [
            ("file", &self.file_template),
            ("directory", &self.directory_template),
            ("name", &self.name_template),
            ("weight name", &self.weight_name_template),
        ] {
            for key in placeholders(template)? {
                if !PLACEHOLDERS.contains(&key) {
                    return Err(Error::Config(format!(
                        "{} template '{}' uses unknown placeholder {{{}}}",
                        what, template, key
                    )));
                }
            }
        }
        if !self.file_template.contains("{sample}") {
            return Err(Error::Config(format!(
                "file template '{}' must contain {{sample}}",
                self.file_template
            )));
        }
        Ok(())
    }

    /// Location of `sample` under `variation`.
    ///
    /// Weight variations are read from the nominal file under the weight name;
    /// shape variations from their own file under the regular name.
    pub fn path(&self, fields: &LayoutFields, sample: &str, variation: &Variation) -> HistogramPath {
        let (file_variation, name_template) = match variation.kind {
            VariationKind::Nominal => (NOMINAL, &self.name_template),
            VariationKind::Weight => (NOMINAL, &self.weight_name_template),
            VariationKind::Shape => (variation.name.as_str(), &self.name_template),
        };
        let lookup = |key: &str, variation_value: &str| -> Option<String> {
            if key == "variation" {
                return Some(variation_value.to_string());
            }
            field(fields, sample, key).map(str::to_string)
        };
        let file = render(&self.file_template, |k| lookup(k, file_variation));
        let directory = render(&self.directory_template, |k| lookup(k, file_variation));
        let name = render(name_template, |k| lookup(k, &variation.name));
        HistogramPath::new(self.base_dir.join(file), &directory, &name)
    }
}

fn placeholders(template: &str) -> Result<Vec<&str>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            Error::Config(format!("template '{}' has an unclosed placeholder", template))
        })?;
        out.push(&after[..end]);
        rest = &after[end + 1..];
    }
    if rest.contains('}') {
        return Err(Error::Config(format!("template '{}' has a stray '}}'", template)));
    }
    Ok(out)
}

fn field<'a>(fields: &'a LayoutFields, sample: &'a str, key: &str) -> Option<&'a str> {
    Some(match key {
        "period" => &fields.period,
        "channel" => &fields.channel,
        "tagger" => &fields.tagger,
        "wp" => &fields.wp,
        "region" => &fields.region,
        "interval" => &fields.interval,
        "fit_variable" => &fields.fit_variable,
        "sample" => sample,
        _ => return None,
    })
}

/// Substitute `{key}` placeholders; unknown keys are left untouched.
fn render(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match lookup(key) {
                    Some(v) => out.push_str(&v),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> LayoutFields {
        LayoutFields {
            period: "UL17".into(),
            channel: "muo".into(),
            tagger: "hotvr_t__tau".into(),
            wp: "Standard".into(),
            region: "Pass".into(),
            interval: "pt_200to250".into(),
            fit_variable: "mass".into(),
        }
    }

    fn variation(name: &str, kind: VariationKind) -> Variation {
        Variation { name: name.into(), short_name: "up".into(), systematic: "x".into(), kind }
    }

    #[test]
    fn nominal_path() {
        let layout = InputLayout::default();
        let p = layout.path(&fields(), "TTbar__MSc_FullyMerged", &Variation::nominal());
        assert_eq!(
            p.to_string(),
            "histograms/UL17/muo/nominal/TTbar__MSc_FullyMerged.json:hotvr_t__tau_Standard_Pass_pt_200to250/mass"
        );
    }

    #[test]
    fn weight_variation_reads_nominal_file() {
        let layout = InputLayout::default();
        let p = layout.path(&fields(), "QCD", &variation("pileup_up", VariationKind::Weight));
        assert_eq!(p.file, PathBuf::from("histograms/UL17/muo/nominal/QCD.json"));
        assert_eq!(p.name(), "mass_pileup_up");
    }

    #[test]
    fn shape_variation_reads_own_file() {
        let layout = InputLayout::default();
        let p = layout.path(&fields(), "QCD", &variation("jes_down", VariationKind::Shape));
        assert_eq!(p.file, PathBuf::from("histograms/UL17/muo/jes_down/QCD.json"));
        assert_eq!(p.name(), "mass");
    }

    #[test]
    fn unknown_placeholder_is_config_error() {
        let layout =
            InputLayout { directory_template: "{tagger}_{year}".into(), ..InputLayout::default() };
        let err = layout.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("{year}"));
    }

    #[test]
    fn unclosed_placeholder_is_config_error() {
        let layout = InputLayout { name_template: "{fit_variable".into(), ..InputLayout::default() };
        assert!(layout.validate().is_err());
        assert!(InputLayout::default().validate().is_ok());
    }
}
