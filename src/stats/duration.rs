use log::warn;
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize};

/// One row of the duration keyword table: every keyword stands for
/// `factor` seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationUnit {
    pub factor: f64,
    #[serde(deserialize_with = "keyword_list")]
    pub keywords: Vec<String>,
}

impl DurationUnit {
    pub fn new(factor: f64, keywords: &[&str]) -> Self {
        Self {
            factor,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

pub fn default_units() -> Vec<DurationUnit> {
    vec![
        DurationUnit::new(1.0, &["s", "sec", "秒"]),
        DurationUnit::new(60.0, &["m", "min", "分", "分鐘"]),
    ]
}

// "s, sec, 秒" or ["s", "sec", "秒"]
fn keyword_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Keywords {
        Csv(String),
        List(Vec<String>),
    }

    let keywords = match Keywords::deserialize(deserializer)? {
        Keywords::Csv(csv) => csv.split(',').map(|k| k.trim().to_string()).collect(),
        Keywords::List(list) => list.into_iter().map(|k| k.trim().to_string()).collect(),
    };
    Ok(keywords)
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!("duration pattern failed to compile: {err}");
            None
        }
    }
}

/// Extracts seconds from free text such as `?5s`, `(30s)`, `<約 1.5 分>`
/// or a bare keyword (`秒` counts as one second).
#[derive(Debug)]
pub struct DurationParser {
    units: Vec<DurationUnit>,
    explicit: Vec<Regex>,
    standalone: Vec<(Regex, f64)>,
}

impl DurationParser {
    pub fn new(units: Vec<DurationUnit>) -> Self {
        let mut keywords: Vec<&str> = units
            .iter()
            .flat_map(|u| u.keywords.iter().map(String::as_str))
            .filter(|k| !k.is_empty())
            .collect();
        // longest first so `分鐘` wins over `分`
        keywords.sort_by_key(|k| std::cmp::Reverse(k.chars().count()));

        let explicit = if keywords.is_empty() {
            Vec::new()
        } else {
            let alternatives = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            [
                format!(r"(?i)\?\s*([0-9]*\.?[0-9]+)\s*({alternatives})"),
                format!(r"(?i)[<\[(\s]\s*(?:約|approx)?\s*([0-9]*\.?[0-9]+)\s*({alternatives})\s*[>\])\s]"),
            ]
            .iter()
            .filter_map(|p| compile(p))
            .collect()
        };

        let mut standalone = Vec::new();
        for unit in &units {
            for keyword in unit.keywords.iter().filter(|k| !k.is_empty()) {
                let alphanumeric = keyword.chars().all(|c| c.is_ascii_alphanumeric());
                // single letters like `s` are too noisy on their own
                if alphanumeric && keyword.chars().count() < 2 {
                    continue;
                }
                let escaped = regex::escape(keyword);
                let pattern = if alphanumeric {
                    format!(r"(?-u:\b){escaped}(?-u:\b)")
                } else {
                    escaped
                };
                if let Some(re) = compile(&pattern) {
                    standalone.push((re, unit.factor));
                }
            }
        }

        Self {
            units,
            explicit,
            standalone,
        }
    }

    fn factor_of(&self, unit: &str) -> Option<f64> {
        let unit = unit.to_lowercase();
        self.units
            .iter()
            .find(|u| u.keywords.iter().any(|k| k.to_lowercase() == unit))
            .map(|u| u.factor)
    }

    pub fn parse(&self, text: &str) -> f64 {
        if text.is_empty() {
            return 0.0;
        }
        let mut total = 0.0;
        let mut remaining = text.to_string();

        for pattern in &self.explicit {
            remaining = pattern
                .replace_all(&remaining, |caps: &Captures| {
                    let value = caps[1].parse::<f64>().ok();
                    if let (Some(value), Some(factor)) = (value, self.factor_of(&caps[2])) {
                        total += value * factor;
                    }
                    " ".repeat(caps[0].len())
                })
                .into_owned();
        }

        for (pattern, factor) in &self.standalone {
            let hits = pattern.find_iter(&remaining).count();
            if hits > 0 {
                total += hits as f64 * factor;
                remaining = pattern
                    .replace_all(&remaining, |caps: &Captures| " ".repeat(caps[0].len()))
                    .into_owned();
            }
        }

        total
    }
}

impl Default for DurationParser {
    fn default() -> Self {
        Self::new(default_units())
    }
}
