// Grantmesh Engine — Funding-Body Blueprints
//
// Each funding body is a VALUE: an `AgentBlueprint` contributing identity,
// a document builder and extra handlers to the shared runtime. No type
// hierarchy — swapping a body in or out never touches the agent code.
//
// Knowledge tables (sectors, programs, councils, hint rules) live here as
// constants so handlers stay plain module functions.

use futures::future::BoxFuture;
use log::info;
use serde_json::{json, Map, Value};

use crate::atoms::error::{ErrorCode, MeshError, MeshResult};
use crate::atoms::types::{Capabilities, CompanyProfile, EligibilityReport, GrantRecord};
use crate::engine::agent::{handler, Agent, AgentBlueprint};
use crate::engine::simp::{Envelope, Intent, Payload};

// ═══════════════════════════════════════════════════════════════════════════
// Knowledge tables
// ═══════════════════════════════════════════════════════════════════════════

const IUK_SECTORS: &[&str] = &[
    "Advanced Manufacturing",
    "Aerospace",
    "Agriculture",
    "AI & Data",
    "Clean Energy",
    "Creative Industries",
    "Digital",
    "Electronics",
    "Health & Life Sciences",
    "Transport",
];

const IUK_GRANT_TYPES: &[&str] =
    &["Smart Grant", "CR&D", "Innovation Voucher", "Knowledge Transfer Partnership", "SBRI"];

const NIHR_FUNDING_STREAMS: &[&str] = &[
    "Research for Patient Benefit",
    "Health Technology Assessment",
    "Programme Grants for Applied Research",
    "Efficacy and Mechanism Evaluation",
    "Health Services and Delivery Research",
    "Public Health Research",
    "Advanced Fellowships",
    "Career Development Fellowships",
];

const UKRI_COUNCILS: &[&str] = &["EPSRC", "ESRC", "MRC", "NERC", "STFC", "AHRC", "BBSRC"];

const HE_PROGRAMS: &[&str] = &[
    "EIC Accelerator",
    "EIC Pathfinder",
    "EIC Transition",
    "Horizon Collaborations",
    "Marie Skłodowska-Curie Actions",
    "European Research Council",
];

const HE_ELIGIBLE_COUNTRIES: &[&str] = &[
    "Austria", "Belgium", "Bulgaria", "Croatia", "Cyprus", "Czech Republic", "Denmark",
    "Estonia", "Finland", "France", "Germany", "Greece", "Hungary", "Ireland", "Italy",
    "Latvia", "Lithuania", "Luxembourg", "Malta", "Netherlands", "Poland", "Portugal",
    "Romania", "Slovakia", "Slovenia", "Spain", "Sweden",
    // Associated country.
    "United Kingdom",
];

/// Per-domain hint rules: (domain, trigger phrases, typical amount range,
/// focus line). Sorted by domain so hint output is deterministic.
const DOMAIN_HINTS: &[(&str, &[&str], (u64, u64), &str)] = &[
    (
        "horizon_europe",
        &["eic", "horizon", "european", "international", "consortium"],
        (500_000, 2_500_000),
        "Research excellence, international collaboration",
    ),
    (
        "innovate_uk",
        &["innovation", "smart grant", "cr&d", "sme"],
        (25_000, 2_000_000),
        "Commercial innovation, UK SMEs",
    ),
    (
        "nihr",
        &["health", "clinical", "patient", "nhs", "medical"],
        (50_000, 500_000),
        "Health research, patient benefit",
    ),
    (
        "ukri",
        &["research council", "epsrc", "esrc", "fundamental research"],
        (100_000, 1_000_000),
        "Fundamental research, academic excellence",
    ),
];

// ═══════════════════════════════════════════════════════════════════════════
// Blueprints
// ═══════════════════════════════════════════════════════════════════════════

/// Innovate UK: UK innovation grants, SME-focused competitions.
pub fn innovate_uk() -> AgentBlueprint {
    AgentBlueprint::new("innovate_uk", "Innovate UK Expert", "innovate_uk", "UK")
        .with_capabilities(Capabilities { can_search: true, can_scrape: true, can_analyze: true })
        .with_document_builder(iuk_document)
        .with_handler(Intent::Analyze, handler(iuk_analyze_entry))
        .with_handler(Intent::Validate, handler(validate_entry))
        .with_on_initialize(|agent| {
            info!(
                "[{}] Tracking {} sectors, {} grant types",
                agent.id,
                IUK_SECTORS.len(),
                IUK_GRANT_TYPES.len()
            );
        })
}

/// NIHR: health research funding, fellowships, clinical programmes.
pub fn nihr() -> AgentBlueprint {
    AgentBlueprint::new("nihr", "NIHR Expert", "nihr", "UK")
        .with_capabilities(Capabilities { can_search: true, can_scrape: true, can_analyze: true })
        .with_document_builder(nihr_document)
        .with_handler(Intent::Validate, handler(validate_entry))
        .with_on_initialize(|agent| {
            info!("[{}] Tracking {} funding streams", agent.id, NIHR_FUNDING_STREAMS.len());
        })
}

/// UKRI: the seven research councils.
pub fn ukri() -> AgentBlueprint {
    AgentBlueprint::new("ukri", "UKRI Expert", "ukri", "UK")
        .with_capabilities(Capabilities { can_search: true, can_scrape: true, can_analyze: true })
        .with_document_builder(ukri_document)
        .with_handler(Intent::Validate, handler(validate_entry))
        .with_on_initialize(|agent| {
            info!("[{}] Covering {} research councils", agent.id, UKRI_COUNCILS.len());
        })
}

/// Horizon Europe: EU framework funding, EIC support.
pub fn horizon_europe() -> AgentBlueprint {
    AgentBlueprint::new("horizon_europe", "Horizon Europe Expert", "horizon_europe", "EU")
        .with_capabilities(Capabilities { can_search: true, can_scrape: true, can_analyze: true })
        .with_document_builder(he_document)
        .with_handler(Intent::Analyze, handler(he_analyze_entry))
        .with_handler(Intent::Validate, handler(validate_entry))
        .with_on_initialize(|agent| {
            info!(
                "[{}] Covering {} countries, {} programs",
                agent.id,
                HE_ELIGIBLE_COUNTRIES.len(),
                HE_PROGRAMS.len()
            );
        })
}

/// SME context expert: stores no grants, answers ANALYZE with a rules-based
/// hint the orchestrator forwards to downstream agents.
pub fn expert_hints() -> AgentBlueprint {
    AgentBlueprint::new("sme_context", "SME Context Expert", "meta", "ALL")
        .with_capabilities(Capabilities { can_search: false, can_scrape: false, can_analyze: true })
        .with_handler(Intent::Analyze, handler(expert_analyze_entry))
        .with_on_initialize(|agent| {
            info!("[{}] SME expert system ready", agent.id);
        })
}

/// Every grant-holding body, in registration order.
pub fn all_bodies() -> Vec<AgentBlueprint> {
    vec![innovate_uk(), nihr(), ukri(), horizon_europe()]
}

// ═══════════════════════════════════════════════════════════════════════════
// Document builders
// ═══════════════════════════════════════════════════════════════════════════

fn extra_str<'a>(grant: &'a GrantRecord, key: &str) -> Option<&'a str> {
    grant.extra.get(key).and_then(Value::as_str)
}

fn extra_list(grant: &GrantRecord, key: &str) -> Vec<String> {
    match grant.extra.get(key) {
        Some(Value::Array(items)) => {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect()
        }
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn join_parts(parts: Vec<String>) -> String {
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect::<Vec<_>>().join(" ")
}

/// Innovate UK: title, description, competition scope, sectors, grant type,
/// eligibility keywords.
fn iuk_document(grant: &GrantRecord) -> String {
    let mut parts = vec![grant.title.clone(), grant.description.clone()];
    if let Some(scope) = extra_str(grant, "scope") {
        parts.push(scope.to_string());
    }
    if !grant.sectors.is_empty() {
        parts.push(grant.sectors.join(" "));
    }
    if let Some(grant_type) = &grant.grant_type {
        parts.push(grant_type.clone());
    }
    if let Some(eligibility) = &grant.eligibility {
        parts.push(eligibility.as_search_text());
    }
    join_parts(parts)
}

/// NIHR: title, description, research area, funding stream.
fn nihr_document(grant: &GrantRecord) -> String {
    let mut parts = vec![grant.title.clone(), grant.description.clone()];
    if let Some(area) = extra_str(grant, "research_area") {
        parts.push(area.to_string());
    }
    if let Some(stream) = extra_str(grant, "funding_stream") {
        parts.push(stream.to_string());
    }
    join_parts(parts)
}

/// UKRI: title, description, owning council.
fn ukri_document(grant: &GrantRecord) -> String {
    let mut parts = vec![grant.title.clone(), grant.description.clone()];
    if let Some(council) = extra_str(grant, "council") {
        parts.push(council.to_string());
    }
    join_parts(parts)
}

/// Horizon Europe: title, description, scope, expected impact, program,
/// topics, TRL range.
fn he_document(grant: &GrantRecord) -> String {
    let mut parts = vec![grant.title.clone(), grant.description.clone()];
    for key in ["scope", "expected_impact", "program"] {
        if let Some(text) = extra_str(grant, key) {
            parts.push(text.to_string());
        }
    }
    let topics = extra_list(grant, "topics");
    if !topics.is_empty() {
        parts.push(topics.join(" "));
    }
    let trl_min = grant.extra.get("trl_min").and_then(Value::as_u64);
    let trl_max = grant.extra.get("trl_max").and_then(Value::as_u64);
    if trl_min.is_some() || trl_max.is_some() {
        parts.push(format!(
            "TRL {}-{}",
            trl_min.map(|t| t.to_string()).unwrap_or_default(),
            trl_max.map(|t| t.to_string()).unwrap_or_default()
        ));
    }
    join_parts(parts)
}

// ═══════════════════════════════════════════════════════════════════════════
// Innovate UK eligibility analysis
// ═══════════════════════════════════════════════════════════════════════════

fn iuk_analyze_entry<'a>(
    agent: &'a Agent,
    env: &'a Envelope,
) -> BoxFuture<'a, MeshResult<Envelope>> {
    Box::pin(async move {
        let Payload::EligibilityQuery { company, sectors } = &env.context else {
            return Err(MeshError::protocol(
                ErrorCode::ProcessingError,
                "ANALYZE envelope without an eligibility_query payload",
            ));
        };

        let is_uk_registered = iuk_check_uk_registration(company);
        let is_sme = iuk_check_sme_status(company);
        let suitable_sectors = iuk_match_sectors(sectors);
        let funding_range = iuk_suggest_funding_range(company);

        let recommendation = if !is_uk_registered {
            "Not eligible - must be UK-registered".to_string()
        } else if !is_sme {
            "Limited options - most Innovate UK grants target SMEs".to_string()
        } else if !suitable_sectors.is_empty() {
            format!("Good fit! Suitable sectors: {}", suitable_sectors.join(", "))
        } else {
            "Eligible - explore cross-sector opportunities".to_string()
        };

        let mut checks = Map::new();
        checks.insert("is_uk_registered".into(), json!(is_uk_registered));
        checks.insert("is_sme".into(), json!(is_sme));
        checks.insert("suitable_sectors".into(), json!(suitable_sectors));
        checks.insert("funding_range".into(), funding_range);

        Ok(env.reply(Payload::EligibilityReport(EligibilityReport {
            agent_id: agent.id.clone(),
            checks,
            recommendation,
        })))
    })
}

fn iuk_check_uk_registration(company: &CompanyProfile) -> bool {
    let location = company.location.as_deref().unwrap_or("").to_uppercase();
    location.contains("UK") || location.contains("UNITED KINGDOM")
}

/// EU SME definition: under 250 employees or under €50M revenue.
/// Unknown figures count in the applicant's favour.
fn iuk_check_sme_status(company: &CompanyProfile) -> bool {
    company.employees.unwrap_or(0) < 250
        || company.annual_revenue.unwrap_or(0.0) < 50_000_000.0
}

fn iuk_match_sectors(company_sectors: &[String]) -> Vec<String> {
    let mut matched = Vec::new();
    for sector in company_sectors {
        let sector_lower = sector.to_lowercase();
        for iuk_sector in IUK_SECTORS {
            let iuk_lower = iuk_sector.to_lowercase();
            if (sector_lower.contains(&iuk_lower) || iuk_lower.contains(&sector_lower))
                && !matched.contains(&iuk_sector.to_string())
            {
                matched.push(iuk_sector.to_string());
            }
        }
    }
    matched
}

fn iuk_suggest_funding_range(company: &CompanyProfile) -> Value {
    let employees = company.employees.unwrap_or(0);
    if employees < 10 {
        json!({ "min": 25_000, "max": 250_000, "suggested_type": "Smart Grant or Innovation Voucher" })
    } else if employees < 50 {
        json!({ "min": 100_000, "max": 500_000, "suggested_type": "Smart Grant" })
    } else {
        json!({ "min": 250_000, "max": 2_000_000, "suggested_type": "Smart Grant or CR&D" })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Horizon Europe eligibility analysis
// ═══════════════════════════════════════════════════════════════════════════

fn he_analyze_entry<'a>(
    agent: &'a Agent,
    env: &'a Envelope,
) -> BoxFuture<'a, MeshResult<Envelope>> {
    Box::pin(async move {
        let Payload::EligibilityQuery { company, .. } = &env.context else {
            return Err(MeshError::protocol(
                ErrorCode::ProcessingError,
                "ANALYZE envelope without an eligibility_query payload",
            ));
        };

        let country = company.country.as_deref().unwrap_or("");
        let country_eligible = HE_ELIGIBLE_COUNTRIES.contains(&country);
        let org_type = company.org_type.as_deref().unwrap_or("").to_lowercase();
        let trl = company.trl.unwrap_or(0);

        let (stage, recommended) = he_match_trl(trl);
        let suitable_programs = he_suitable_programs(&org_type);
        let consortium_guidance = he_consortium_guidance(&org_type);

        let recommendation = if !country_eligible {
            "Check associated country status - may still be eligible".to_string()
        } else {
            format!("Suitable for: {} (TRL {})", recommended.join(", "), trl)
        };

        let mut checks = Map::new();
        checks.insert(
            "country_eligible".into(),
            json!({
                "eligible": country_eligible,
                "country": country,
                "status": if country_eligible { "Eligible" } else { "Check associated country status" },
            }),
        );
        checks.insert(
            "org_type_suitable".into(),
            json!({ "organization_type": org_type, "suitable_programs": suitable_programs }),
        );
        checks.insert(
            "trl_match".into(),
            json!({ "trl": trl, "stage": stage, "recommended": recommended }),
        );
        checks.insert("consortium_guidance".into(), json!(consortium_guidance));

        Ok(env.reply(Payload::EligibilityReport(EligibilityReport {
            agent_id: agent.id.clone(),
            checks,
            recommendation,
        })))
    })
}

fn he_match_trl(trl: u8) -> (&'static str, Vec<&'static str>) {
    if trl <= 4 {
        ("Early stage", vec!["EIC Pathfinder", "ERC"])
    } else if trl <= 6 {
        ("Mid stage", vec!["EIC Transition", "Horizon Collaborations"])
    } else {
        ("Market-ready", vec!["EIC Accelerator"])
    }
}

fn he_suitable_programs(org_type: &str) -> &'static str {
    // First match wins; checked in a fixed order.
    const SUITABLE: &[(&str, &str)] = &[
        ("sme", "EIC Accelerator, EIC Pathfinder"),
        ("startup", "EIC Accelerator"),
        ("university", "All programs"),
        ("research", "EIC Pathfinder, ERC, MSCA"),
        ("large enterprise", "Horizon Collaborations"),
    ];
    SUITABLE
        .iter()
        .find(|(key, _)| org_type.contains(key))
        .map(|(_, programs)| *programs)
        .unwrap_or("Horizon Collaborations")
}

fn he_consortium_guidance(org_type: &str) -> &'static str {
    if org_type.contains("sme") || org_type.contains("startup") {
        "EIC Accelerator: Solo applications accepted. Collaborations optional."
    } else {
        "Most Horizon programs require multi-partner consortia (3+ countries)"
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Grant validation (shared by all bodies)
// ═══════════════════════════════════════════════════════════════════════════

fn validate_entry<'a>(agent: &'a Agent, env: &'a Envelope) -> BoxFuture<'a, MeshResult<Envelope>> {
    Box::pin(async move {
        let Payload::ValidateQuery { grant } = &env.context else {
            return Err(MeshError::protocol(
                ErrorCode::ProcessingError,
                "VALIDATE envelope without a validate_query payload",
            ));
        };

        let problems = validate_grant(grant);
        Ok(env.reply(Payload::ValidateReport {
            agent_id: agent.id.clone(),
            valid: problems.is_empty(),
            problems,
        }))
    })
}

/// Pre-ingest checks. Deliberately shallow: the mesh does not vouch for
/// grant data, it only refuses records it cannot index or rank.
pub fn validate_grant(grant: &GrantRecord) -> Vec<String> {
    let mut problems = Vec::new();
    if grant.title.trim().is_empty() {
        problems.push("missing title".to_string());
    }
    if grant.description.trim().is_empty() {
        problems.push("missing description".to_string());
    }
    if let (Some(min), Some(max)) = (grant.amount_min, grant.amount_max) {
        if min > max {
            problems.push(format!("amount_min {} exceeds amount_max {}", min, max));
        }
    }
    if let Some(deadline) = grant.deadline {
        if deadline < chrono::Utc::now().date_naive() {
            problems.push(format!("deadline {} has already passed", deadline));
        }
    }
    if let Some(url) = &grant.source_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            problems.push("source_url is not an absolute URL".to_string());
        }
    }
    problems
}

// ═══════════════════════════════════════════════════════════════════════════
// SME expert hints (rules-based)
// ═══════════════════════════════════════════════════════════════════════════

fn expert_analyze_entry<'a>(
    agent: &'a Agent,
    env: &'a Envelope,
) -> BoxFuture<'a, MeshResult<Envelope>> {
    Box::pin(async move {
        let Payload::AnalyzeQuery { query, filters } = &env.context else {
            return Err(MeshError::protocol(
                ErrorCode::ProcessingError,
                "ANALYZE envelope without an analyze_query payload",
            ));
        };

        let query_lower = query.to_lowercase();
        let mut insights = Vec::new();

        if let Some(insight) = hint_company_size(&query_lower) {
            insights.push(insight);
        }
        if let Some(insight) = hint_sector(&query_lower) {
            insights.push(insight);
        }
        if let Some(insight) = hint_geography(&query_lower, &filters.silos) {
            insights.push(insight);
        }
        if let Some(insight) = hint_timeline(&query_lower) {
            insights.push(insight);
        }
        if let Some(insight) = hint_pitfalls(&query_lower) {
            insights.push(insight);
        }

        let suggested_domains = suggest_domains(&query_lower);
        let insights = if insights.is_empty() {
            "No specific insights for this query".to_string()
        } else {
            insights.join(" | ")
        };

        Ok(env.reply(Payload::ExpertHint {
            agent_id: agent.id.clone(),
            insights,
            suggested_domains,
        }))
    })
}

fn hint_company_size(query: &str) -> Option<String> {
    if query.contains("startup") || query.contains("early stage") {
        return Some(
            "For startups: Smart Grants (£25k-£2M) or Innovation Vouchers (£5k) are best starting points"
                .into(),
        );
    }
    if query.contains("sme") || query.contains("small business") {
        return Some(
            "SME programs: You qualify for most UK grants. Focus on Smart Grants and CR&D".into(),
        );
    }
    if query.contains("scale up") || query.contains("scale-up") {
        return Some(
            "Scale-ups: Consider larger programs like Horizon EIC (€0.5-2.5M) or CR&D (£100k-£10M)"
                .into(),
        );
    }
    None
}

fn hint_sector(query: &str) -> Option<String> {
    // (sector, trigger keywords, top programs, tip) in a fixed order.
    const SECTOR_RULES: &[(&str, &[&str], &str, &str)] = &[
        (
            "AI",
            &["ai", "machine learning", "deep learning", "nlp", "computer vision"],
            "Smart Grant, Horizon EIC",
            "Emphasize real-world applications and market validation",
        ),
        (
            "HEALTH",
            &["health", "digital health", "medtech", "diagnostics", "therapeutics"],
            "NIHR, Horizon Health",
            "Strong clinical evidence and regulatory pathway required",
        ),
        (
            "CLEANTECH",
            &["cleantech", "renewable", "carbon", "sustainability", "net zero"],
            "Smart Grant, Horizon Green",
            "Focus on measurable environmental impact",
        ),
    ];

    for (sector, keywords, programs, tip) in SECTOR_RULES {
        if keywords.iter().any(|kw| query.contains(kw)) {
            return Some(format!(
                "{} focus: Best programs are {}. Tip: {}",
                sector, programs, tip
            ));
        }
    }
    None
}

fn hint_geography(query: &str, silos: &[String]) -> Option<String> {
    let uk_silo = silos.len() == 1 && silos[0] == "UK";
    if query.contains("uk") || uk_silo {
        return Some(
            "UK-focused: Check Innovate UK first (fast decisions, 3-6 months). SME <250 employees required"
                .into(),
        );
    }
    let eu_silo = silos.len() == 1 && silos[0] == "EU";
    if query.contains("europe") || query.contains("eu") || eu_silo {
        return Some(
            "EU programs: Horizon Europe has larger grants but longer timelines (6-12 months). More competitive"
                .into(),
        );
    }
    None
}

fn hint_timeline(query: &str) -> Option<String> {
    if query.contains("urgent") || query.contains("quick") || query.contains("fast") {
        return Some(
            "Fast funding: Innovation Vouchers (2-4 weeks) or SBRI (3 months) are quickest".into(),
        );
    }
    if query.contains("large")
        && ["funding", "grant", "investment"].iter().any(|w| query.contains(w))
    {
        return Some(
            "Large grants take longer: Expect 6-12 months for Horizon EIC or major CR&D awards"
                .into(),
        );
    }
    None
}

fn hint_pitfalls(query: &str) -> Option<String> {
    let mut warnings = Vec::new();
    if query.contains("first time") || query.contains("new to") {
        warnings.push("First time? Start small with Innovation Vouchers to learn the process");
    }
    if query.contains("ai") && query.contains("grant") {
        warnings.push("AI grants are competitive: Show real customers and revenue potential");
    }
    if warnings.is_empty() {
        None
    } else {
        Some(warnings.join(" | "))
    }
}

/// Domains whose trigger phrases appear in the query, in table order.
fn suggest_domains(query: &str) -> Vec<String> {
    DOMAIN_HINTS
        .iter()
        .filter(|(_, keywords, _, _)| keywords.iter().any(|kw| query.contains(kw)))
        .map(|(domain, _, _, _)| domain.to_string())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
