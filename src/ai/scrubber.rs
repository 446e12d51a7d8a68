//! PII scrubbing for free-text payloads
//!
//! An ordered rule set replaces each match with a neutral category token,
//! e.g. `[REDACTED:EMAIL]`. Rules run in a fixed order (identifiers before
//! phone numbers, so an SSN is tagged as an identifier rather than a phone)
//! and none of the replacement tokens is itself matchable, which makes
//! scrubbing idempotent: `scrub(scrub(x)) == scrub(x)`.
//!
//! Span metadata (category, offset, matched text) is kept for auditing only
//! and is never persisted with the enriched record.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiCategory {
    Email,
    GovId,
    Serial,
    Phone,
    Address,
    Name,
}

impl PiiCategory {
    pub fn token(&self) -> &'static str {
        match self {
            PiiCategory::Email => "[REDACTED:EMAIL]",
            PiiCategory::GovId => "[REDACTED:GOV_ID]",
            PiiCategory::Serial => "[REDACTED:SERIAL]",
            PiiCategory::Phone => "[REDACTED:PHONE]",
            PiiCategory::Address => "[REDACTED:ADDRESS]",
            PiiCategory::Name => "[REDACTED:NAME]",
        }
    }
}

/// One redaction, recorded against the text version of its own pass.
#[derive(Debug, Clone)]
pub struct PiiSpan {
    pub category: PiiCategory,
    pub start: usize,
    pub matched: String,
}

#[derive(Debug, Clone)]
pub struct Scrubbed {
    pub text: String,
    pub spans: Vec<PiiSpan>,
}

static RULES: LazyLock<Vec<(PiiCategory, Regex)>> = LazyLock::new(|| {
    vec![
        (
            PiiCategory::Email,
            Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email rule"),
        ),
        // Identifiers run before phones: an SSN must not be half-eaten by the
        // phone rule.
        (
            PiiCategory::GovId,
            Regex::new(
                r"(?x)
                \b\d{3}-\d{2}-\d{4}\b                                   # SSN
                | \b[A-Z]\d{9}\b                                         # DE insurance number
                | (?:Versichertennummer|Versicherungsnummer
                    |Insurance\s+(?:ID|No\.?|Number)
                    |Policy\s+(?:No\.?|Number))
                  \s*[:：]?\s*[A-Z0-9][A-Z0-9\-]{4,}                     # labeled insurance/policy
                ",
            )
            .expect("gov id rule"),
        ),
        (
            PiiCategory::Serial,
            Regex::new(
                r"(?x)
                (?:S/N|\bSN\b|Serial\s*(?:No\.?|Number)?|Seriennummer
                   |num[ée]ro\s+de\s+s[ée]rie|シリアル番号|序列号)
                \s*[:\#：]?\s*[A-Za-z0-9][A-Za-z0-9\-]{4,}
                ",
            )
            .expect("serial rule"),
        ),
        (
            PiiCategory::Phone,
            Regex::new(
                r"(?x)
                (?:\+\d{1,3}[\s.\-]?)?                                   # country code
                (?:\(\d{1,4}\)[\s.\-]?)?                                 # area in parens
                \d{2,4}[\s.\-]\d{3,8}(?:[\s.\-]\d{2,6})?                 # grouped digits
                (?:\s*(?:ext|x|Durchwahl|poste|内線)\.?\s*\d{1,5})?\b    # extension
                | \b1[3-9]\d{9}\b                                        # CN mobile
                ",
            )
            .expect("phone rule"),
        ),
        (
            PiiCategory::Address,
            Regex::new(
                r"(?x)
                \b\d{1,5}\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?\s+
                  (?:Street|St\.?|Avenue|Ave\.?|Road|Rd\.?|Boulevard|Blvd\.?|Lane|Ln\.?|Drive)\b
                | \b[A-ZÄÖÜ][a-zäöüß]+(?:straße|strasse|weg|platz|allee|gasse)\s+\d{1,4}[a-z]?\b
                | \b\d{1,4}\s*,?\s+(?:rue|avenue|boulevard)\s+(?:de\s+la\s+|de\s+|des\s+|du\s+)?[A-ZÉÀ][\w'\-]+
                ",
            )
            .expect("address rule"),
        ),
        (
            PiiCategory::Name,
            Regex::new(
                r"(?x)
                \b(?:(?:Mr|Mrs|Ms|Dr|Prof|Herr|Frau|Mme|Mlle)\.?|M\.)\s+
                  [A-ZÄÖÜ][\w'\-]+(?:\s+[A-ZÄÖÜ][\w'\-]+){0,2}           # honorific + name
                | (?:Name|Patient|Contact|Kontakt|Ansprechpartner|Technician|Technicien
                     |Nom|担当者|担当|患者|氏名|姓名|联系人)
                  \s*[:：]\s*
                  (?:[A-ZÄÖÜ][\w'\-]+(?:\s+[A-ZÄÖÜ][\w'\-]+){0,2}
                     |[\p{Han}\p{Hiragana}\p{Katakana}]{2,6})            # labeled name
                ",
            )
            .expect("name rule"),
        ),
    ]
});

/// Deterministic, idempotent PII scrubber.
#[derive(Default)]
pub struct Scrubber;

impl Scrubber {
    pub fn new() -> Self {
        Self
    }

    pub fn scrub(&self, text: &str) -> Scrubbed {
        let mut current = text.to_string();
        let mut spans = Vec::new();

        for (category, rule) in RULES.iter() {
            if !rule.is_match(&current) {
                continue;
            }
            let mut out = String::with_capacity(current.len());
            let mut last = 0;
            for m in rule.find_iter(&current) {
                out.push_str(&current[last..m.start()]);
                out.push_str(category.token());
                spans.push(PiiSpan {
                    category: *category,
                    start: m.start(),
                    matched: m.as_str().to_string(),
                });
                last = m.end();
            }
            out.push_str(&current[last..]);
            current = out;
        }

        Scrubbed {
            text: current,
            spans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Curated multilingual fixture: text plus the category expected to be
    /// detected (None for clean text that must pass through untouched).
    fn fixture() -> Vec<(&'static str, Option<PiiCategory>)> {
        use PiiCategory::*;
        vec![
            // Email (EN/DE/FR)
            ("Contact me at john.doe@example.com for details", Some(Email)),
            ("E-Mail: hans.mueller@klinik-beispiel.de", Some(Email)),
            ("envoyez le rapport à marie.dupont@hopital.fr", Some(Email)),
            // Government / insurance identifiers
            ("SSN on file: 123-45-6789", Some(GovId)),
            ("Versichertennummer: A123456789", Some(GovId)),
            ("Insurance No: POL-556677", Some(GovId)),
            ("Policy Number: KV-2211-88", Some(GovId)),
            // Device serials (EN/DE/FR/ZH/JA)
            ("Serial Number: SN-44532-AB replaced", Some(Serial)),
            ("Seriennummer: XR20-99821 defekt", Some(Serial)),
            ("S/N: 5TGH-88210", Some(Serial)),
            ("numéro de série: NX-77821", Some(Serial)),
            ("序列号: GT-500-221 故障", Some(Serial)),
            ("シリアル番号: NX-77821 交換済み", Some(Serial)),
            // Phones
            ("call 555-123-4567 tomorrow", Some(Phone)),
            ("erreichbar unter +49 30 901820", Some(Phone)),
            ("Tel: 555-123-4567 ext. 42", Some(Phone)),
            ("電話 03-1234-5678 まで", Some(Phone)),
            ("手机 13812345678 联系", Some(Phone)),
            ("hotline +1 (555) 123-4567", Some(Phone)),
            // Addresses
            ("ship the unit to 123 Main Street today", Some(Address)),
            ("Lieferung an Hauptstraße 15", Some(Address)),
            ("livré au 12 rue de la Paix", Some(Address)),
            // Names
            ("reported by Dr. Smith on site", Some(Name)),
            ("Herr Müller meldet einen Defekt", Some(Name)),
            ("Patient: Maria Rossi transferred", Some(Name)),
            ("Mme Lefèvre a signalé la panne", Some(Name)),
            ("担当者: 田中太郎 が対応", Some(Name)),
            ("患者: 王小明 已出院", Some(Name)),
            // Clean technical text that must survive untouched
            ("Pump overheated after 2024-03-01 12:30:00", None),
            ("error code E1234 on unit 7", None),
            ("temperature reached 85.5 degrees", None),
            ("torque 45 Nm applied to flange", None),
            ("Betriebsstunden 1200 h seit letzter Wartung", None),
            ("firmware v2.3.1 installed", None),
            ("replaced filter and bearing", None),
            ("ISO 13485 audit passed", None),
            ("batch 20240301 processed", None),
            ("Kalibrierung nach Norm durchgeführt", None),
        ]
    }

    #[test]
    fn precision_and_recall_on_fixture() {
        let scrubber = Scrubber::new();
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;

        for (text, expected) in fixture() {
            let result = scrubber.scrub(text);
            match expected {
                Some(category) => {
                    if result.spans.iter().any(|s| s.category == category) {
                        tp += 1;
                    } else {
                        fn_ += 1;
                    }
                    // Detections of other categories on a positive are noise
                    fp += result
                        .spans
                        .iter()
                        .filter(|s| s.category != category)
                        .count();
                }
                None => {
                    fp += result.spans.len();
                    assert_eq!(
                        result.text, text,
                        "clean text was modified: {:?}",
                        result.text
                    );
                }
            }
        }

        let precision = tp as f64 / (tp + fp).max(1) as f64;
        let recall = tp as f64 / (tp + fn_).max(1) as f64;
        assert!(precision >= 0.95, "precision {precision} below target");
        assert!(recall >= 0.95, "recall {recall} below target");
    }

    #[test]
    fn scrub_is_idempotent() {
        let scrubber = Scrubber::new();
        for (text, _) in fixture() {
            let once = scrubber.scrub(text);
            let twice = scrubber.scrub(&once.text);
            assert_eq!(once.text, twice.text, "not idempotent for {text:?}");
            assert!(twice.spans.is_empty(), "second pass matched in {text:?}");
        }
    }

    #[test]
    fn scrub_is_deterministic() {
        let scrubber = Scrubber::new();
        let text = "Dr. Smith (john.doe@example.com, 555-123-4567) at 123 Main Street";
        let a = scrubber.scrub(text);
        let b = scrubber.scrub(text);
        assert_eq!(a.text, b.text);
        assert_eq!(a.spans.len(), b.spans.len());
    }

    #[test]
    fn replaces_with_category_tokens() {
        let scrubber = Scrubber::new();
        let result = scrubber.scrub("mail john.doe@example.com or call 555-123-4567");
        assert!(result.text.contains("[REDACTED:EMAIL]"));
        assert!(result.text.contains("[REDACTED:PHONE]"));
        assert!(!result.text.contains("john.doe"));
        assert!(!result.text.contains("4567"));
    }

    #[test]
    fn ssn_is_tagged_identifier_not_phone() {
        let scrubber = Scrubber::new();
        let result = scrubber.scrub("SSN 123-45-6789");
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].category, PiiCategory::GovId);
    }

    #[test]
    fn spans_carry_matched_text_for_audit() {
        let scrubber = Scrubber::new();
        let result = scrubber.scrub("reach me at jane@example.org");
        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].matched, "jane@example.org");
        assert_eq!(result.spans[0].start, 12);
    }

    #[test]
    fn empty_and_clean_text_pass_through() {
        let scrubber = Scrubber::new();
        assert_eq!(scrubber.scrub("").text, "");
        let clean = "bearing worn, replaced and tested";
        assert_eq!(scrubber.scrub(clean).text, clean);
    }
}
