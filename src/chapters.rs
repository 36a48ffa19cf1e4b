use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Chapter bucket for chunks that fall before the first detected heading.
pub const UNKNOWN_CHAPTER: &str = "Unknown";

/// Ordered catalog of the manual's chapter titles, each with a
/// hand-maintained set of question keywords.
///
/// The catalog serves two purposes: heading detection during ingestion
/// (a page line matching a title starts a new current chapter) and
/// keyword-based chapter guessing at query time. Guessing is intentionally
/// a coarse heuristic; a miss degrades to unfiltered search.
pub struct ChapterCatalog {
    chapters: Vec<ChapterEntry>,
}

struct ChapterEntry {
    title: String,
    keywords: Vec<String>,
}

impl ChapterCatalog {
    /// Catalog for the vehicle owner's manual this service indexes.
    pub fn vehicle_manual() -> Self {
        Self::with_table(vec![
            (
                "Getting in",
                vec![
                    "tailgate", "boot", "trunk", "door", "doors", "key", "keys", "unlock",
                    "lock", "locking", "remote", "window", "windows", "sunroof", "mirror",
                    "mirrors",
                ],
            ),
            (
                "Seats and restraints",
                vec![
                    "seat", "seats", "seatbelt", "belt", "airbag", "airbags", "child",
                    "headrest", "isofix",
                ],
            ),
            (
                "Instruments and controls",
                vec![
                    "dashboard", "speedometer", "warning", "indicator", "gauge", "display",
                    "horn", "wiper", "wipers",
                ],
            ),
            (
                "Lights",
                vec!["headlight", "headlights", "headlamp", "beam", "fog", "bulb"],
            ),
            (
                "Climate control",
                vec![
                    "heating", "heater", "conditioning", "ventilation", "defrost", "demist",
                ],
            ),
            (
                "Starting and driving",
                vec![
                    "start", "starting", "ignition", "engine", "gear", "gearbox", "clutch",
                    "brake", "brakes", "cruise", "steering", "parking", "towing",
                ],
            ),
            (
                "Fuel and refuelling",
                vec!["fuel", "petrol", "diesel", "refuel", "refuelling", "filler", "tank"],
            ),
            (
                "Wheels and tyres",
                vec!["tyre", "tyres", "tire", "tires", "wheel", "wheels", "puncture", "jack"],
            ),
            (
                "Maintenance",
                vec![
                    "oil", "coolant", "battery", "fuse", "fuses", "service", "fluid",
                    "filter", "wash", "washer",
                ],
            ),
            (
                "Technical data",
                vec!["dimensions", "weight", "capacity", "specification", "specifications"],
            ),
        ])
    }

    /// Builds a catalog from an explicit `(title, keywords)` table.
    /// Tests substitute their own tables here without touching retrieval.
    pub fn with_table(table: Vec<(&str, Vec<&str>)>) -> Self {
        let chapters = table
            .into_iter()
            .map(|(title, keywords)| ChapterEntry {
                title: title.to_string(),
                keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            })
            .collect();
        Self { chapters }
    }

    /// Guesses the chapter a question is about.
    ///
    /// Lower-cases the question, tokenizes it, and returns the first
    /// catalog chapter whose keyword set intersects the question's tokens.
    /// Returns `None` when nothing matches; the caller then searches the
    /// whole corpus.
    pub fn guess(&self, question: &str) -> Option<&str> {
        let tokens: HashSet<String> = question
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();

        self.chapters
            .iter()
            .find(|entry| entry.keywords.iter().any(|k| tokens.contains(k)))
            .map(|entry| entry.title.as_str())
    }

    /// Matches a page line against the catalog's titles for heading
    /// detection during ingestion. Leading section numbers ("3. Getting in")
    /// are stripped before comparison.
    pub fn match_heading(&self, line: &str) -> Option<&str> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.len() > 80 {
            return None;
        }

        let stripped = heading_number_regex().replace(trimmed, "");
        let candidate = stripped.trim();

        self.chapters
            .iter()
            .find(|entry| entry.title.eq_ignore_ascii_case(candidate))
            .map(|entry| entry.title.as_str())
    }
}

/// Cached regex stripping numbered-heading prefixes (e.g. "3." or "3.2 ").
fn heading_number_regex() -> &'static Regex {
    static HEADING_NUMBER: OnceLock<Regex> = OnceLock::new();
    HEADING_NUMBER
        .get_or_init(|| Regex::new(r"^\d+(\.\d+)*\.?\s+").expect("valid heading number pattern"))
}
