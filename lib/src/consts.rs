//! IRIs and literal values the projection cares about, primarily from the
//! MADS/RDF, RecordInfo, RDFS, SKOS and RDF vocabularies.

// mads
pub const AUTHORITATIVE_LABEL: &str = "http://www.loc.gov/mads/rdf/v1#authoritativeLabel";
pub const ADMIN_METADATA: &str = "http://www.loc.gov/mads/rdf/v1#adminMetadata";
// recordinfo
pub const RECORD_STATUS: &str = "http://id.loc.gov/ontologies/RecordInfo#recordStatus";
// rdfs / skos / rdf
pub const LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
pub const PREF_LABEL: &str = "http://www.w3.org/2004/02/skos/core#prefLabel";
pub const ALT_LABEL: &str = "http://www.w3.org/2004/02/skos/core#altLabel";
pub const TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Value of `recordStatus` that marks a record as superseded.
pub const STATUS_DEPRECATED: &str = "deprecated";

/// The only language whose tagged literals are kept.
pub const LANGUAGE: &str = "en";

/// rdf:type IRI → term type, checked in declaration order.
pub const TERM_TYPE_MAPPING: [(&str, &str); 10] = [
    ("http://www.loc.gov/mads/rdf/v1#Topic", "topic"),
    ("http://www.loc.gov/mads/rdf/v1#Geographic", "geographic"),
    ("http://www.loc.gov/mads/rdf/v1#PersonalName", "name_personal"),
    ("http://www.loc.gov/mads/rdf/v1#ComplexSubject", "complex_subject"),
    ("http://www.loc.gov/mads/rdf/v1#CorporateName", "name_corporate"),
    ("http://www.loc.gov/mads/rdf/v1#GenreForm", "genreform"),
    ("http://www.loc.gov/mads/rdf/v1#Temporal", "temporal"),
    ("http://www.loc.gov/mads/rdf/v1#NameTitle", "name_title"),
    ("http://www.loc.gov/mads/rdf/v1#Title", "title"),
    ("http://www.loc.gov/mads/rdf/v1#ConferenceName", "name_conference"),
];

/// Input lines between progress log messages.
pub const PROGRESS_EVERY: u64 = 1_000_000;
