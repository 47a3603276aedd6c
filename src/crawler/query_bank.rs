//! Search query generation keyed by industry and mode

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Placeholder replaced by each industry term
const TERM: &str = "{term}";

/// Query template set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    /// Dorks aimed at job seekers posting their own profile
    #[default]
    Candidates,
    /// Wider net including CV pages and open profile listings
    Broad,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Candidates => "candidates",
            Self::Broad => "broad",
        }
    }

    fn templates(&self) -> &'static [&'static str] {
        match self {
            Self::Candidates => CANDIDATE_TEMPLATES,
            Self::Broad => BROAD_TEMPLATES,
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidates" => Ok(Self::Candidates),
            "broad" => Ok(Self::Broad),
            other => Err(format!("unknown query mode '{}'", other)),
        }
    }
}

const CANDIDATE_TEMPLATES: &[&str] = &[
    r#""{term}" "suche neue herausforderung" (telefon OR handy OR mobil)"#,
    r#""{term}" "suche stelle" "@gmail.com" OR "@web.de" OR "@gmx.de""#,
    r#"site:kleinanzeigen.de/s-stellengesuche "{term}""#,
    r#""stellengesuch" "{term}" "kontakt""#,
    r#""{term}" "open to work" "+49 1""#,
    r#""ich biete" "{term}" "erfahrung" "erreichbar unter""#,
];

const BROAD_TEMPLATES: &[&str] = &[
    r#""{term}" lebenslauf kontakt "0151" OR "0160" OR "0170" OR "0176""#,
    r#""{term}" profil "verfügbar ab" email"#,
    r#"intitle:"{term}" "freiberuflich" "kontakt""#,
    r#""{term}" "wechselwillig" OR "wechselbereit""#,
];

/// Search terms per industry key; unknown keys search for the key itself
const INDUSTRY_TERMS: &[(&str, &[&str])] = &[
    (
        "vertrieb",
        &["Vertriebsmitarbeiter", "Außendienst", "Key Account Manager", "Vertriebler"],
    ),
    ("callcenter", &["Call Center Agent", "Telefonverkauf", "Kundenberater"]),
    ("handwerk", &["Elektriker", "Anlagenmechaniker", "Schreiner"]),
    ("pflege", &["Pflegefachkraft", "Altenpfleger", "Pflegehelfer"]),
    ("logistik", &["Lagerist", "Berufskraftfahrer", "Kommissionierer"]),
    ("it", &["Softwareentwickler", "Systemadministrator", "IT Support"]),
];

/// A query ready to be issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    pub industry: String,
    pub text: String,
}

/// Expands industries into deduplicated dork queries
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBank {
    mode: QueryMode,
}

impl QueryBank {
    pub fn new(mode: QueryMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    /// Terms known for `industry`, falling back to the key itself
    pub fn terms_for(industry: &str) -> Vec<&str> {
        let key = industry.trim().to_lowercase();
        INDUSTRY_TERMS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, terms)| terms.to_vec())
            .unwrap_or_else(|| vec![industry.trim()])
    }

    /// Every query for `industry`, in a stable order, without duplicates
    pub fn generate(&self, industry: &str) -> Vec<GeneratedQuery> {
        let mut seen = HashSet::new();
        let mut queries = Vec::new();

        for template in self.mode.templates() {
            for term in Self::terms_for(industry) {
                if term.is_empty() {
                    continue;
                }
                let text = template.replace(TERM, term);
                if seen.insert(text.to_lowercase()) {
                    queries.push(GeneratedQuery {
                        industry: industry.to_string(),
                        text,
                    });
                }
            }
        }
        queries
    }

    /// Queries for all industries, interleaved so no industry starves
    pub fn generate_all(&self, industries: &[String]) -> Vec<GeneratedQuery> {
        let per_industry: Vec<Vec<GeneratedQuery>> = industries.iter().map(|i| self.generate(i)).collect();
        let longest = per_industry.iter().map(Vec::len).max().unwrap_or(0);

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for i in 0..longest {
            for queries in &per_industry {
                if let Some(q) = queries.get(i) {
                    if seen.insert(q.text.to_lowercase()) {
                        out.push(q.clone());
                    }
                }
            }
        }
        out
    }
}
