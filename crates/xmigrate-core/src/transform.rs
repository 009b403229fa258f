//! Record rewriting for the destination server.
//!
//! [`AttributeTransformer::transform`] is pure: it reads the identifier map
//! but never writes it, and returns a rewritten copy of the source record.
//! Rules run in a fixed order:
//!
//! 1. project records take the destination id, secondary id and name
//! 2. `ID` is stripped (except projects and scans) and `project` points at
//!    the destination project
//! 3. generic `xnat:imageScanData` records get a concrete scan type from
//!    their modality
//! 4. child collections and server-managed blocks are removed
//! 5. identifier references are translated through the identifier map;
//!    scan references keep their caller-assigned id
//! 6. file URIs are moved from the source archive root to the destination's

use crate::id_map::IdentifierMap;
use crate::kind::ResourceKind;
use crate::project::ProjectInfo;
use crate::record::{QName, Record, XnatNamespace};
use crate::{MigrateError, Result};

const XNAT: XnatNamespace = XnatNamespace::Xnat;

/// Modality code → concrete scan element.
const MODALITY_SCAN_TYPES: [(&str, &str); 5] = [
    ("MR", "MRScan"),
    ("CT", "CTScan"),
    ("US", "USScan"),
    ("PT", "PETScan"),
    ("NM", "NMScan"),
];

const FALLBACK_SCAN_TYPE: &str = "OtherDicomScan";

/// Children that must not be submitted on create.
const STRIPPED_CHILDREN: [(XnatNamespace, &str); 6] = [
    (XNAT, "experiments"),
    (XNAT, "scans"),
    (XNAT, "assessors"),
    (XNAT, "reconstructions"),
    (XNAT, "prearchivePath"),
    (XNAT, "sharing"),
];

/// Fields whose text is an identifier of another resource.
const REFERENCE_FIELDS: [(XnatNamespace, &str, ResourceKind); 7] = [
    (XnatNamespace::Icr, "subjectID", ResourceKind::Subject),
    (XNAT, "subject_ID", ResourceKind::Subject),
    (XNAT, "image_session_ID", ResourceKind::Experiment),
    (XNAT, "imageSession_ID", ResourceKind::Experiment),
    (XNAT, "session_id", ResourceKind::Experiment),
    (XNAT, "scanID", ResourceKind::Scan),
    (XNAT, "imageScan_ID", ResourceKind::Scan),
];

/// Rewrites source records into records the destination will accept.
#[derive(Debug, Clone, Copy)]
pub struct AttributeTransformer<'a> {
    source: &'a ProjectInfo,
    destination: &'a ProjectInfo,
    id_map: &'a IdentifierMap,
}

impl<'a> AttributeTransformer<'a> {
    pub fn new(
        source: &'a ProjectInfo,
        destination: &'a ProjectInfo,
        id_map: &'a IdentifierMap,
    ) -> Self {
        Self {
            source,
            destination,
            id_map,
        }
    }

    /// Produce the destination copy of `record`.
    ///
    /// Fails with [`MigrateError::MappingMiss`] when a referenced identifier
    /// has not been mapped yet, and with [`MigrateError::PathLayout`] when a
    /// file URI lies outside the source project's archive root.
    pub fn transform(&self, record: &Record, kind: ResourceKind) -> Result<Record> {
        let mut out = record.clone();

        if kind == ResourceKind::Project {
            self.apply_project_identity(&mut out);
        }

        if !kind.keeps_source_id() {
            out.remove_attr("ID");
        }
        out.set_attr("project", self.destination.id.as_str());

        if out.name == XNAT.name("imageScanData") {
            out.name = infer_scan_type(&out);
        }

        for (ns, local) in STRIPPED_CHILDREN {
            out.remove_children(&ns.name(local));
        }

        self.remap_references(&mut out)?;
        self.rewrite_uris(&mut out)?;

        Ok(out)
    }

    fn apply_project_identity(&self, record: &mut Record) {
        record.set_attr("ID", self.destination.id.as_str());
        if let Some(secondary_id) = &self.destination.secondary_id {
            record.set_attr("secondary_ID", secondary_id.as_str());
        }
        if let Some(name) = &self.destination.name {
            let tag = XNAT.name("name");
            for child in record.children_named_mut(&tag) {
                child.text = Some(name.clone());
            }
        }
    }

    fn remap_references(&self, record: &mut Record) -> Result<()> {
        for (ns, local, kind) in REFERENCE_FIELDS {
            // Caller-assigned identifiers carry over unchanged.
            if kind.keeps_source_id() {
                continue;
            }
            let tag = ns.name(local);
            for child in record.children_named_mut(&tag) {
                let Some(source_id) = child.text().map(str::to_string) else {
                    continue;
                };
                let context = tag.to_string();
                child.text = Some(self.id_map.lookup(kind, &source_id, &context)?);
            }
        }
        Ok(())
    }

    fn rewrite_uris(&self, record: &mut Record) -> Result<()> {
        let source_root = self.source.archive_root();
        let destination_root = self.destination.archive_root();
        let file = XNAT.name("file");
        let out = XNAT.name("out");
        let resources = XNAT.name("resources");
        let resource = XNAT.name("resource");

        for child in record.children_named_mut(&file) {
            rewrite_uri(child, &source_root, &destination_root)?;
        }
        for group in record.children_named_mut(&out) {
            for child in group.children_named_mut(&file) {
                rewrite_uri(child, &source_root, &destination_root)?;
            }
        }
        for group in record.children_named_mut(&resources) {
            for child in group.children_named_mut(&resource) {
                rewrite_uri(child, &source_root, &destination_root)?;
            }
        }
        Ok(())
    }
}

/// Concrete scan element for a generic scan record.
///
/// Exactly one known modality selects its scan type; none, several, or an
/// unknown code fall back to `xnat:OtherDicomScan`.
pub fn infer_scan_type(record: &Record) -> QName {
    let modality_tag = XNAT.name("modality");
    let modalities: Vec<&str> = record
        .children_named(&modality_tag)
        .filter_map(Record::text)
        .collect();

    let local = match modalities.as_slice() {
        [single] => MODALITY_SCAN_TYPES
            .iter()
            .find(|(code, _)| code == single)
            .map(|(_, scan_type)| *scan_type)
            .unwrap_or(FALLBACK_SCAN_TYPE),
        _ => FALLBACK_SCAN_TYPE,
    };
    XNAT.name(local)
}

fn rewrite_uri(record: &mut Record, source_root: &str, destination_root: &str) -> Result<()> {
    let Some(uri) = record.attr("URI") else {
        return Ok(());
    };
    let rest = uri
        .strip_prefix(source_root)
        .filter(|rest| rest.is_empty() || rest.starts_with('/'));
    let Some(rest) = rest else {
        return Err(MigrateError::PathLayout {
            value: uri.to_string(),
            expected_prefix: source_root.to_string(),
        });
    };
    let rewritten = format!("{}{}", destination_root, rest);
    record.set_attr("URI", rewritten);
    Ok(())
}
