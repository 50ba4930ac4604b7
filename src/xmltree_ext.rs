// Helpers to read request bodies with xmltree and to write
// responses with the xml-rs event writer.
use std::io::{Read, Write};

use xml::writer::{EmitterConfig, EventWriter, XmlEvent};
use xml::writer::Result as XmlWResult;
use xmltree::{Element, XMLNode};

use crate::errors::DavError;
use crate::util::MemBuffer;
use crate::DavResult;

pub(crate) const DAV_NS: &str = "DAV:";

pub(crate) trait ElementExt {
    /// Parse a request body. The root element must be in the DAV: namespace.
    fn parse2<R: Read>(r: R) -> DavResult<Element>;
    /// Iterate over the child elements.
    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a>;
    /// Is this element `DAV:{name}`.
    fn is_dav(&self, name: &str) -> bool;
    /// Write this element (and its children) as events.
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> XmlWResult<()>;
}

impl ElementExt for Element {
    fn parse2<R: Read>(r: R) -> DavResult<Element> {
        let elem = Element::parse(r)?;
        if elem.namespace.as_deref() != Some(DAV_NS) {
            return Err(DavError::XmlReadError);
        }
        Ok(elem)
    }

    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a> {
        Box::new(self.children.iter().filter_map(|n| match n {
            XMLNode::Element(e) => Some(e),
            _ => None,
        }))
    }

    fn is_dav(&self, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(DAV_NS)
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> XmlWResult<()> {
        let name = match self.namespace.as_deref() {
            Some(DAV_NS) => format!("D:{}", self.name),
            _ => self.name.clone(),
        };
        let mut ev = XmlEvent::start_element(name.as_str());
        if let Some(ns) = self.namespace.as_deref() {
            if ns != DAV_NS {
                ev = ev.default_ns(ns);
            }
        }
        for (k, v) in self.attributes.iter() {
            ev = ev.attr(k.as_str(), v.as_str());
        }
        emitter.write(ev)?;
        for node in &self.children {
            match node {
                XMLNode::Element(e) => e.write_ev(emitter)?,
                XMLNode::Text(t) => emitter.write(XmlEvent::characters(t))?,
                XMLNode::CData(t) => emitter.write(XmlEvent::cdata(t))?,
                _ => {}
            }
        }
        emitter.write(XmlEvent::end_element())
    }
}

/// An event writer into a memory buffer, with the xml declaration
/// already written.
pub(crate) fn emitter(buf: MemBuffer) -> DavResult<EventWriter<MemBuffer>> {
    let mut emitter = EmitterConfig::new()
        .perform_indent(false)
        .normalize_empty_elements(false)
        .create_writer(buf);
    emitter.write(XmlEvent::StartDocument {
        version: xml::common::XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    Ok(emitter)
}

/// Write `<D:{name}>text</D:{name}>`.
pub(crate) fn write_text<W: Write>(emitter: &mut EventWriter<W>, name: &str, text: &str) -> XmlWResult<()> {
    emitter.write(XmlEvent::start_element(name))?;
    if !text.is_empty() {
        emitter.write(XmlEvent::characters(text))?;
    }
    emitter.write(XmlEvent::end_element())
}

/// Write an empty element.
pub(crate) fn write_empty<W: Write>(emitter: &mut EventWriter<W>, name: &str) -> XmlWResult<()> {
    emitter.write(XmlEvent::start_element(name))?;
    emitter.write(XmlEvent::end_element())
}
