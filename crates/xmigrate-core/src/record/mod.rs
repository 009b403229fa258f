//! Owned element trees for XNAT resource records.
//!
//! A [`Record`] is what the server returns for `GET …?format=xml` and what it
//! accepts on create. Names are namespace-qualified so the transformer can
//! match fields regardless of the prefix the server chose.

pub mod xml;

use std::fmt;

/// XNAT XML namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XnatNamespace {
    Xnat,
    Prov,
    Xdat,
    Xs,
    Proc,
    Fs,
    Icr,
    Xsi,
}

impl XnatNamespace {
    pub const ALL: [XnatNamespace; 8] = [
        XnatNamespace::Xnat,
        XnatNamespace::Prov,
        XnatNamespace::Xdat,
        XnatNamespace::Xs,
        XnatNamespace::Proc,
        XnatNamespace::Fs,
        XnatNamespace::Icr,
        XnatNamespace::Xsi,
    ];

    pub fn uri(&self) -> &'static str {
        match self {
            XnatNamespace::Xnat => "http://nrg.wustl.edu/xnat",
            XnatNamespace::Prov => "http://www.nbirn.net/prov",
            XnatNamespace::Xdat => "http://nrg.wustl.edu/xdat",
            XnatNamespace::Xs => "http://www.w3.org/2001/XMLSchema",
            XnatNamespace::Proc => "http://nrg.wustl.edu/proc",
            XnatNamespace::Fs => "http://nrg.wustl.edu/fs",
            XnatNamespace::Icr => "http://icr.ac.uk/icr",
            XnatNamespace::Xsi => "http://www.w3.org/2001/XMLSchema-instance",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            XnatNamespace::Xnat => "xnat",
            XnatNamespace::Prov => "prov",
            XnatNamespace::Xdat => "xdat",
            XnatNamespace::Xs => "xs",
            XnatNamespace::Proc => "proc",
            XnatNamespace::Fs => "fs",
            XnatNamespace::Icr => "icr",
            XnatNamespace::Xsi => "xsi",
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        XnatNamespace::ALL.iter().copied().find(|ns| ns.uri() == uri)
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        XnatNamespace::ALL
            .iter()
            .copied()
            .find(|ns| ns.prefix() == prefix)
    }

    /// Qualified name in this namespace.
    pub fn name(&self, local: &str) -> QName {
        QName::new(Some(self.uri()), local)
    }
}

/// Namespace-qualified element or attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(namespace: Option<&str>, local: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            local: local.to_string(),
        }
    }

    /// Unqualified name, as used by most XNAT attributes (`ID`, `label`).
    pub fn local(local: &str) -> Self {
        Self::new(None, local)
    }

    /// Parse `prefix:local` using the known XNAT prefixes.
    ///
    /// Unknown prefixes yield `None`; a name without a prefix is unqualified.
    pub fn from_prefixed(name: &str) -> Option<Self> {
        match name.split_once(':') {
            Some((prefix, local)) => {
                XnatNamespace::from_prefix(prefix).map(|ns| ns.name(local))
            }
            None => Some(Self::local(name)),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(uri) => match XnatNamespace::from_uri(uri) {
                Some(ns) => write!(f, "{}:{}", ns.prefix(), self.local),
                None => write!(f, "{{{}}}{}", uri, self.local),
            },
            None => f.write_str(&self.local),
        }
    }
}

/// One element of a resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: QName,
    /// Attributes in document order.
    pub attributes: Vec<(QName, String)>,
    pub text: Option<String>,
    pub children: Vec<Record>,
}

impl Record {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Value of an unqualified attribute.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attr_q(&QName::local(local))
    }

    pub fn attr_q(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set an unqualified attribute, keeping its position when present.
    pub fn set_attr(&mut self, local: &str, value: impl Into<String>) {
        self.set_attr_q(QName::local(local), value);
    }

    pub fn set_attr_q(&mut self, name: QName, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Remove an unqualified attribute, returning its value.
    pub fn remove_attr(&mut self, local: &str) -> Option<String> {
        let name = QName::local(local);
        let index = self.attributes.iter().position(|(key, _)| *key == name)?;
        Some(self.attributes.remove(index).1)
    }

    /// Direct children with the given name.
    pub fn children_named<'a>(&'a self, name: &'a QName) -> impl Iterator<Item = &'a Record> {
        self.children.iter().filter(move |child| child.name == *name)
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        name: &'a QName,
    ) -> impl Iterator<Item = &'a mut Record> {
        self.children
            .iter_mut()
            .filter(move |child| child.name == *name)
    }

    /// Drop every direct child with the given name; returns how many went.
    pub fn remove_children(&mut self, name: &QName) -> usize {
        let before = self.children.len();
        self.children.retain(|child| child.name != *name);
        before - self.children.len()
    }

    /// Trimmed text content, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Builder-style attribute setter used when assembling records in code.
    pub fn with_attr(mut self, local: &str, value: impl Into<String>) -> Self {
        self.set_attr(local, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: Record) -> Self {
        self.children.push(child);
        self
    }
}
