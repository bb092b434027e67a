//! Heuristic fit scoring against the candidate profile, plus the explanation strings shown in
//! the digest.

use serde::Serialize;

pub const BASE_SCORE: u32 = 60;
/// Heuristic ceiling. 91-100 is only reachable through enrichment.
pub const HEURISTIC_SCORE_CAP: u32 = 90;
pub const ENRICHED_SCORE_CAP: u32 = 100;

const DOMAIN_TERM_POINTS: u32 = 4;
const DOMAIN_TERM_MAX: u32 = 20;
const EXTRA_TERM_POINTS: u32 = 2;
const EXTRA_TERM_MAX: u32 = 10;

pub const VENDOR_COMPANIES: &[&str] = &[
    "fenergo",
    "complyadvantage",
    "quantexa",
    "lexisnexis",
    "nice actimize",
    "actimize",
    "pega",
    "oracle",
    "fis",
    "moody",
    "s&p global",
    "appian",
    "kyc360",
    "ripjar",
    "symphonyai",
    "saphyre",
    "encompass",
    "napier",
    "bridger",
    "dow jones",
    "alloy",
    "onfido",
    "trulioo",
    "sumsub",
    "veriff",
    "socure",
    "experian",
    "kyckr",
    "entrust",
    "finscan",
    "imtf",
    "norbloc",
    "smartkyc",
    "kyc portal",
];

pub const FINTECH_COMPANIES: &[&str] = &[
    "wise",
    "airwallex",
    "revolut",
    "monzo",
    "starling",
    "engine by starling",
    "visa",
    "mastercard",
    "worldpay",
    "checkout.com",
    "stripe",
    "modulr",
    "gocardless",
    "klarna",
    "n26",
    "tide",
    "mollie",
    "jpmorganchase",
    "goldman sachs",
    "marcus",
    "lseg",
    "broadridge",
    "davies",
    "experian",
    "socure",
    "kyckr",
    "quantexa",
    "complyadvantage",
    "plaid",
    "truelayer",
    "tink",
    "marqeta",
    "adyen",
    "rapyd",
    "curve",
    "chip",
    "kroo",
    "zopa",
    "oaknorth",
    "clearpay",
    "funding circle",
    "lendable",
    "zilch",
];

pub const BANK_COMPANIES: &[&str] = &[
    "barclays",
    "hsbc",
    "natwest",
    "lloyds",
    "lloyds banking group",
    "santander",
    "standard chartered",
    "citi",
    "jpmorgan",
    "goldman sachs",
    "morgan stanley",
    "bank of america",
    "deutsche bank",
    "ubs",
    "lseg",
    "nationwide",
    "tsb",
    "virgin money",
    "metro bank",
    "tesco bank",
    "coutts",
    "bnp paribas",
    "rbc",
    "ing",
    "rabobank",
    "abn amro",
    "unicredit",
];

pub const TECH_COMPANIES: &[&str] = &[
    "google",
    "microsoft",
    "amazon",
    "apple",
    "meta",
    "salesforce",
    "oracle",
    "sap",
    "servicenow",
    "atlassian",
];

pub const DOMAIN_TERMS: &[&str] = &[
    "kyc",
    "aml",
    "onboarding",
    "screening",
    "financial crime",
    "transaction monitoring",
    "sanctions",
    "identity",
    "fraud",
    "compliance",
    "due diligence",
    "edd",
    "cdd",
    "kyb",
    "clm",
    "client lifecycle",
    "customer lifecycle",
    "account opening",
    "account onboarding",
    "client onboarding",
    "regulatory",
    "regtech",
    "case management",
    "investigation",
];

pub const EXTRA_TERMS: &[&str] = &[
    "api",
    "platform",
    "data",
    "analytics",
    "dashboard",
    "workflow",
    "orchestration",
    "decisioning",
    "rules",
    "configuration",
    "integration",
];

/// Company tiers, each checked independently: a company in two tiers earns both bonuses.
const COMPANY_TIERS: &[(&[&str], u32, &str)] = &[
    (VENDOR_COMPANIES, 12, "RegTech/Vendor"),
    (FINTECH_COMPANIES, 8, "Fintech/Payments"),
    (BANK_COMPANIES, 6, "Bank/FS"),
    (TECH_COMPANIES, 4, "Big Tech"),
];

const REASON_HINTS: &[(&str, &str)] = &[
    ("onboarding", "Onboarding workflow ownership fits your KYC/onboarding platform delivery."),
    ("kyc", "KYC domain aligns with your screening and compliance controls work."),
    ("aml", "AML product experience aligns with your financial crime delivery."),
    ("fraud", "Fraud prevention aligns with your screening-threshold optimization work."),
    ("identity", "Identity verification aligns with your onboarding and risk controls background."),
    ("case management", "Case management aligns with investigation and alert triage workflows."),
    ("investigation", "Investigation workflow ownership aligns with your financial crime delivery."),
    ("data", "Data and analytics product work aligns with your reporting dashboard builds."),
    ("api", "Platform/API focus matches your integration and orchestration experience."),
    ("clm", "Client lifecycle management aligns with your onboarding and screening background."),
    (
        "client lifecycle",
        "Client lifecycle management aligns with your onboarding and screening background.",
    ),
    (
        "customer lifecycle",
        "Customer lifecycle management aligns with your onboarding and screening background.",
    ),
    ("account opening", "Account opening aligns with onboarding and journey design experience."),
    ("kyb", "KYB exposure aligns with your complex entity onboarding experience."),
    ("screening", "Screening and monitoring align with your financial crime controls work."),
];
const MAX_REASONS: usize = 3;
const FALLBACK_REASON: &str =
    "Strong fit with your financial crime, onboarding, and platform delivery background.";

const GAP_HINTS: &[(&str, &str)] = &[
    ("lending", "Highlight any lending or credit lifecycle exposure."),
    ("credit", "Highlight any credit decisioning or lending exposure."),
    ("mobile", "Show any mobile UX or app product experience."),
    ("consumer", "Emphasize consumer or retail onboarding if applicable."),
    ("payments", "Show any payments or merchant onboarding experience."),
    ("merchant", "Add any merchant onboarding or acquiring examples."),
    ("ml", "Call out ML or model-driven risk tooling if relevant."),
    ("machine learning", "Call out ML or model-driven risk tooling if relevant."),
    ("data platform", "Emphasize data platform and data quality ownership."),
];
const MAX_GAPS: usize = 2;
const FALLBACK_GAP: &str =
    "No obvious gaps; emphasize cross-functional delivery and regulated environment experience.";

const PREFERENCE_LOCATION_TERMS: &[&str] = &["london", "remote", "united kingdom", "hybrid"];
const PREFERENCE_DOMAIN_TERMS: &[&str] =
    &["kyc", "aml", "screening", "onboarding", "financial crime", "sanctions"];
const PREFERENCE_SEPARATOR: &str = " · ";
const FALLBACK_PREFERENCE: &str = "General product fit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FitScore {
    pub score: u32,
    pub matched_domain: Vec<&'static str>,
    pub matched_extra: Vec<&'static str>,
}

fn matches(haystack: &str, terms: &'static [&'static str]) -> Vec<&'static str> {
    terms.iter().copied().filter(|t| haystack.contains(t)).collect()
}

fn any_in(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| haystack.contains(t))
}

/// Scores `text` (title, company and summary) for a posting at `company`. The result always
/// lies in `BASE_SCORE..=HEURISTIC_SCORE_CAP`.
pub fn score_fit(text: &str, company: &str) -> FitScore {
    let text = text.to_lowercase();
    let company = company.to_lowercase();
    let matched_domain = matches(&text, DOMAIN_TERMS);
    let matched_extra = matches(&text, EXTRA_TERMS);

    let mut score = BASE_SCORE;
    score += (DOMAIN_TERM_POINTS * matched_domain.len() as u32).min(DOMAIN_TERM_MAX);
    score += (EXTRA_TERM_POINTS * matched_extra.len() as u32).min(EXTRA_TERM_MAX);
    for (companies, bonus, _) in COMPANY_TIERS {
        if any_in(&company, companies) {
            score += bonus;
        }
    }
    if text.contains("onboarding") || text.contains("kyc") {
        score += 3;
    }
    if text.contains("api") {
        score += 3;
    }

    FitScore {
        score: score.min(HEURISTIC_SCORE_CAP),
        matched_domain,
        matched_extra,
    }
}

fn hint_sentences(text: &str, hints: &[(&str, &str)], limit: usize, fallback: &str) -> String {
    let text = text.to_lowercase();
    let picked: Vec<&str> = hints
        .iter()
        .filter(|(key, _)| text.contains(key))
        .map(|(_, sentence)| *sentence)
        .take(limit)
        .collect();
    if picked.is_empty() {
        fallback.to_string()
    } else {
        picked.join(" ")
    }
}

pub fn build_reasons(text: &str) -> String {
    hint_sentences(text, REASON_HINTS, MAX_REASONS, FALLBACK_REASON)
}

pub fn build_gaps(text: &str) -> String {
    hint_sentences(text, GAP_HINTS, MAX_GAPS, FALLBACK_GAP)
}

pub fn build_preference_match(text: &str, company: &str, location: &str) -> String {
    let text = text.to_lowercase();
    let company = company.to_lowercase();
    let location = location.to_lowercase();

    let mut tags = Vec::new();
    if any_in(&location, PREFERENCE_LOCATION_TERMS) {
        tags.push("London/Remote UK");
    }
    if text.contains("product") {
        tags.push("Product role");
    }
    if any_in(&text, PREFERENCE_DOMAIN_TERMS) {
        tags.push("KYC/AML/Onboarding");
    }
    for (companies, _, tag) in COMPANY_TIERS {
        if any_in(&company, companies) {
            tags.push(*tag);
        }
    }
    if text.contains("api") || text.contains("platform") {
        tags.push("Platform/API");
    }

    if tags.is_empty() {
        FALLBACK_PREFERENCE.to_string()
    } else {
        tags.join(PREFERENCE_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_posting_scores_base() {
        let fit = score_fit("Product Manager at Nobody Ltd", "Nobody Ltd");
        assert_eq!(fit.score, BASE_SCORE);
        assert!(fit.matched_domain.is_empty());
    }

    #[test]
    fn score_components_add_up() {
        // kyc, onboarding (2 domain = 8); platform (1 extra = 2); kyc/onboarding bonus 3.
        let fit = score_fit("Product Owner KYC onboarding platform", "Acme");
        assert_eq!(fit.matched_domain, vec!["kyc", "onboarding"]);
        assert_eq!(fit.matched_extra, vec!["platform"]);
        assert_eq!(fit.score, 60 + 8 + 2 + 3);
    }

    #[test]
    fn company_tiers_stack() {
        // experian is both a vendor and a fintech.
        let fit = score_fit("Product Manager", "Experian");
        assert_eq!(fit.score, 60 + 12 + 8);
        let fit = score_fit("Product Manager", "Barclays");
        assert_eq!(fit.score, 60 + 6);
    }

    #[test]
    fn score_is_capped() {
        let text = "kyc aml onboarding screening sanctions fraud identity compliance \
                    api platform data analytics workflow rules integration";
        let fit = score_fit(text, "Fenergo");
        assert_eq!(fit.score, HEURISTIC_SCORE_CAP);
    }

    #[test]
    fn score_is_bounded_for_varied_inputs() {
        let texts = [
            "",
            "product",
            "kyc",
            "api api api",
            "financial crime transaction monitoring case management investigation",
            "KYC AML EDD CDD KYB CLM regtech regulatory data dashboard orchestration",
        ];
        let companies = ["", "Monzo", "HSBC", "Google", "Oracle", "Fenergo Quantexa Monzo HSBC"];
        for text in texts {
            for company in companies {
                let score = score_fit(text, company).score;
                assert!((BASE_SCORE..=HEURISTIC_SCORE_CAP).contains(&score), "{text} {company}");
            }
        }
    }

    #[test]
    fn reasons_keep_declaration_order_and_limit() {
        let reasons = build_reasons("screening, api, kyc and onboarding work");
        assert_eq!(
            reasons,
            [REASON_HINTS[0].1, REASON_HINTS[1].1, REASON_HINTS[8].1].join(" ")
        );
        assert_eq!(build_reasons("Product Manager"), FALLBACK_REASON);
    }

    #[test]
    fn gaps_limit_to_two() {
        let gaps = build_gaps("consumer lending and payments");
        assert_eq!(gaps, [GAP_HINTS[0].1, GAP_HINTS[3].1].join(" "));
        assert_eq!(build_gaps("Product Manager"), FALLBACK_GAP);
    }

    #[test]
    fn preference_match_tags_in_order() {
        let tags = build_preference_match(
            "Senior Product Manager KYC platform",
            "Monzo",
            "London, United Kingdom",
        );
        assert_eq!(
            tags,
            "London/Remote UK · Product role · KYC/AML/Onboarding · Fintech/Payments · Platform/API"
        );
        assert_eq!(build_preference_match("Analyst", "Acme", "Paris"), FALLBACK_PREFERENCE);
    }
}
