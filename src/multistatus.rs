//! Streaming WebDAV multistatus responses.
//!
//! PROPFIND enumerations can cover arbitrarily many objects, so the
//! document is written incrementally: after each `<response>` the caller
//! drains the buffer with [`MultiStatus::take`] and ships it, leaving the
//! writer ready for the next entry.

use bytes::Bytes;
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

use crate::errors::DavResult;
use crate::store::ObjectStat;
use crate::util::{systemtime_to_httpdate, MemBuffer};

pub(crate) const CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";

pub(crate) struct MultiStatus {
    xw: EventWriter<MemBuffer>,
}

impl MultiStatus {
    pub(crate) fn new() -> DavResult<MultiStatus> {
        let mut xw = EmitterConfig::new()
            .write_document_declaration(true)
            .perform_indent(false)
            .create_writer(MemBuffer::new());
        xw.write(XmlEvent::start_element("multistatus").default_ns("DAV:"))?;
        Ok(MultiStatus { xw })
    }

    /// Append one `<response>` entry. `stat` is absent only for the bare
    /// root entry; `getcontenttype` is emitted when the MIME type is known.
    pub(crate) fn add_item(
        &mut self,
        href: &str,
        stat: Option<&ObjectStat>,
        mime: Option<&str>,
    ) -> DavResult<()> {
        self.xw.write(XmlEvent::start_element("response"))?;

        self.xw.write(XmlEvent::start_element("href"))?;
        self.xw.write(XmlEvent::characters(href))?;
        self.xw.write(XmlEvent::end_element())?;

        self.xw.write(XmlEvent::start_element("propstat"))?;
        self.xw.write(XmlEvent::start_element("prop"))?;
        if let Some(stat) = stat {
            self.xw.write(XmlEvent::start_element("getcontentlength"))?;
            self.xw.write(XmlEvent::characters(&stat.size.to_string()))?;
            self.xw.write(XmlEvent::end_element())?;

            self.xw.write(XmlEvent::start_element("getlastmodified"))?;
            self.xw
                .write(XmlEvent::characters(&systemtime_to_httpdate(stat.modified)))?;
            self.xw.write(XmlEvent::end_element())?;
        }
        if let Some(mime) = mime {
            self.xw.write(XmlEvent::start_element("getcontenttype"))?;
            self.xw.write(XmlEvent::characters(mime))?;
            self.xw.write(XmlEvent::end_element())?;
        }
        self.xw.write(XmlEvent::end_element())?; // prop

        self.xw.write(XmlEvent::start_element("status"))?;
        self.xw.write(XmlEvent::characters("HTTP/1.1 200 OK"))?;
        self.xw.write(XmlEvent::end_element())?;

        self.xw.write(XmlEvent::end_element())?; // propstat
        self.xw.write(XmlEvent::end_element())?; // response
        Ok(())
    }

    /// Drain what has been written so far and reset the buffer.
    pub(crate) fn take(&mut self) -> Bytes {
        self.xw.inner_mut().take()
    }

    /// Close the document and return whatever is still buffered.
    pub(crate) fn close(mut self) -> DavResult<Bytes> {
        self.xw.write(XmlEvent::end_element())?; // multistatus
        Ok(self.xw.inner_mut().take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn single_item_document() {
        let mut ms = MultiStatus::new().unwrap();
        let stat = ObjectStat {
            size: 5,
            modified: UNIX_EPOCH,
        };
        ms.add_item("/foo.txt", Some(&stat), Some("text/plain")).unwrap();
        let doc = String::from_utf8(ms.close().unwrap().to_vec()).unwrap();
        assert!(doc.contains("<multistatus xmlns=\"DAV:\">"));
        assert!(doc.contains("<href>/foo.txt</href>"));
        assert!(doc.contains("<getcontentlength>5</getcontentlength>"));
        assert!(doc.contains("<getlastmodified>Thu, 01 Jan 1970 00:00:00 GMT</getlastmodified>"));
        assert!(doc.contains("<getcontenttype>text/plain</getcontenttype>"));
        assert!(doc.contains("<status>HTTP/1.1 200 OK</status>"));
        assert!(doc.ends_with("</multistatus>"));
    }

    #[test]
    fn take_streams_incrementally() {
        let mut ms = MultiStatus::new().unwrap();
        ms.add_item("/", None, None).unwrap();
        let head = ms.take();
        assert!(std::str::from_utf8(&head).unwrap().contains("<href>/</href>"));
        ms.add_item("/b", None, None).unwrap();
        let tail = String::from_utf8(ms.close().unwrap().to_vec()).unwrap();
        // the second flush holds only what came after the first.
        assert!(!tail.contains("<href>/</href>"));
        assert!(tail.contains("<href>/b</href>"));
        assert!(tail.ends_with("</multistatus>"));
    }

    #[test]
    fn href_is_escaped() {
        let mut ms = MultiStatus::new().unwrap();
        ms.add_item("/a&b", None, None).unwrap();
        let doc = String::from_utf8(ms.close().unwrap().to_vec()).unwrap();
        assert!(doc.contains("<href>/a&amp;b</href>"));
    }
}
