use crate::extract::classify::{classify, Classification, ClassificationRule};
use crate::extract::contact::{
    extract_emails, extract_mobile_phones, extract_whatsapp_links, normalize_email, normalize_mobile,
    whatsapp_mobile,
};
use crate::extract::name::{extract_company, extract_name, extract_role, extract_skills, name_from_email};
use crate::extract::relevance::{RelevanceFilter, RelevanceVerdict};
use crate::lead::{Lead, LeadType};
use scraper::{Html, Node};
use std::sync::Arc;

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Visible text and link targets of an HTML page
#[derive(Debug, Clone, Default)]
pub struct PageDocument {
    pub title: Option<String>,
    pub text: String,
    pub hrefs: Vec<String>,
}

impl PageDocument {
    /// Parses HTML leniently; broken markup yields whatever text survives
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);
        let mut chunks: Vec<&str> = Vec::new();
        let mut hrefs = Vec::new();
        let mut title = None;

        for node in document.root_element().descendants() {
            match node.value() {
                Node::Text(text) => {
                    let parent = node
                        .parent()
                        .and_then(|p| p.value().as_element().map(|e| e.name()));
                    if parent == Some("title") && title.is_none() {
                        let t = text.trim();
                        if !t.is_empty() {
                            title = Some(t.to_string());
                        }
                    }
                    let skipped = node.ancestors().any(|a| {
                        a.value()
                            .as_element()
                            .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
                    });
                    if !skipped {
                        let t = text.trim();
                        if !t.is_empty() {
                            chunks.push(t);
                        }
                    }
                }
                Node::Element(element) => {
                    if let Some(href) = element.attr("href") {
                        hrefs.push(href.trim().to_string());
                    }
                }
                _ => {}
            }
        }

        Self {
            title,
            text: chunks.join("\n"),
            hrefs,
        }
    }
}

/// Provenance of a fetched page
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub url: String,
    pub portal: Option<String>,
    pub query: Option<String>,
    pub industry: Option<String>,
}

impl PageContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Result of running one page through the pipeline
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    /// An accepted lead with at least one contact field
    Lead(Box<Lead>),
    /// Classification or the relevance filter blocked the page
    Rejected { lead_type: LeadType, reason: String },
    /// Accepted classification but nothing to contact
    NoContact { lead_type: LeadType },
}

impl ExtractionOutcome {
    pub fn lead(&self) -> Option<&Lead> {
        match self {
            Self::Lead(lead) => Some(lead),
            _ => None,
        }
    }
}

/// Contact fields found on a page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contacts {
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub whatsapp: Vec<String>,
}

impl Contacts {
    pub fn from_document(doc: &PageDocument) -> Self {
        let mut emails = extract_emails(&doc.text);
        let mut phones = extract_mobile_phones(&doc.text);
        let mut whatsapp = Vec::new();

        for href in &doc.hrefs {
            let lower = href.to_lowercase();
            if lower.starts_with("mailto:") {
                if let Some(email) = normalize_email(href) {
                    push_unique(&mut emails, email);
                }
            } else if lower.starts_with("tel:") {
                if let Some(phone) = normalize_mobile(&href[4..]) {
                    push_unique(&mut phones, phone);
                }
            } else {
                for link in extract_whatsapp_links(href) {
                    push_unique(&mut whatsapp, link);
                }
            }
        }
        for link in extract_whatsapp_links(&doc.text) {
            push_unique(&mut whatsapp, link);
        }

        if phones.is_empty() {
            if let Some(phone) = whatsapp.iter().find_map(|link| whatsapp_mobile(link)) {
                phones.push(phone);
            }
        }

        Self {
            emails,
            phones,
            whatsapp,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.phones.is_empty()
    }
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// HTML → classified `Lead` pipeline
#[derive(Clone, Default)]
pub struct ExtractionPipeline {
    relevance: Option<Arc<dyn RelevanceFilter>>,
}

impl ExtractionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relevance_filter(mut self, filter: Arc<dyn RelevanceFilter>) -> Self {
        self.relevance = Some(filter);
        self
    }

    /// Parses, classifies and (optionally) relevance-checks a page
    ///
    /// Never fails: malformed input produces a partial or empty result.
    pub async fn process(&self, html: &str, ctx: &PageContext) -> ExtractionOutcome {
        let doc = PageDocument::parse(html);
        let contacts = Contacts::from_document(&doc);
        let classification = classify(&ctx.url, &doc.text, !contacts.is_empty());

        tracing::debug!(
            url = %ctx.url,
            lead_type = %classification.lead_type,
            rule = ?classification.rule,
            emails = contacts.emails.len(),
            phones = contacts.phones.len(),
            "Classified page"
        );

        if !classification.accepted {
            return ExtractionOutcome::Rejected {
                lead_type: classification.lead_type,
                reason: format!("{:?}", classification.rule),
            };
        }

        if let Some(filter) = &self.relevance {
            if let Some(reason) = self.relevance_rejection(filter.as_ref(), ctx, &doc, &classification).await {
                return ExtractionOutcome::Rejected {
                    lead_type: LeadType::Garbage,
                    reason,
                };
            }
        }

        if contacts.is_empty() {
            return ExtractionOutcome::NoContact {
                lead_type: classification.lead_type,
            };
        }

        ExtractionOutcome::Lead(Box::new(build_lead(&doc, &contacts, &classification, ctx)))
    }

    /// Returns a rejection reason only when the filter may discard the page
    async fn relevance_rejection(
        &self,
        filter: &dyn RelevanceFilter,
        ctx: &PageContext,
        doc: &PageDocument,
        classification: &Classification,
    ) -> Option<String> {
        let reason = match filter.check(&ctx.url, &doc.text).await {
            Ok(RelevanceVerdict::Relevant) => return None,
            Ok(RelevanceVerdict::Irrelevant { reason }) => reason,
            Err(e) => {
                tracing::warn!(url = %ctx.url, filter = filter.name(), error = %e, "Relevance filter failed, keeping page");
                return None;
            }
        };

        if relevance_overridden(classification) {
            tracing::info!(
                url = %ctx.url,
                filter = filter.name(),
                reason = %reason,
                rule = ?classification.rule,
                "Relevance verdict overridden by rule-based signal"
            );
            return None;
        }
        Some(reason)
    }
}

/// True when an irrelevant verdict must be ignored
pub fn relevance_overridden(classification: &Classification) -> bool {
    matches!(
        classification.rule,
        ClassificationRule::StrongCandidate | ClassificationRule::ContactOverride
    ) || (classification.signals.any_strong() && classification.signals.has_contact)
}

fn build_lead(doc: &PageDocument, contacts: &Contacts, classification: &Classification, ctx: &PageContext) -> Lead {
    let mut lead = Lead::new(ctx.url.clone());
    lead.email = contacts.emails.first().cloned();
    lead.phone = contacts.phones.first().cloned();
    lead.whatsapp = contacts.whatsapp.first().cloned();
    lead.name = extract_name(&doc.text).or_else(|| lead.email.as_deref().and_then(name_from_email));
    lead.role = extract_role(&doc.text).or_else(|| doc.title.as_deref().and_then(extract_role));
    lead.company = extract_company(&doc.text);
    lead.skills = extract_skills(&doc.text);
    lead.lead_type = classification.lead_type;
    lead.source_portal = ctx.portal.clone();
    lead.source_query = ctx.query.clone();
    lead.industry = ctx.industry.clone();
    for tag in &classification.tags {
        lead.add_tag(tag);
    }
    lead
}
