use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};

/// A `Representation` element of an MPD with the fields needed to address
/// its segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Representation {
    pub id: String,
    pub mime_type: Option<String>,
    /// `SegmentTemplate@initialization`
    pub initialization: Option<String>,
    /// `SegmentTemplate@media`
    pub media: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Default)]
struct AdaptationContext {
    mime_type: Option<String>,
    initialization: Option<String>,
    media: Option<String>,
}

/// Collect every `Period > AdaptationSet > Representation` of an MPD.
///
/// A Representation without its own `SegmentTemplate` inherits the one
/// declared on its AdaptationSet. The AdaptationSet `mimeType` wins over the
/// Representation's. Malformed XML yields an empty list.
pub fn parse_manifest(data: &[u8]) -> Vec<Representation> {
    match walk(data) {
        Ok(representations) => {
            debug!(count = representations.len(), "Parsed DASH manifest");
            representations
        }
        Err(reason) => {
            warn!(%reason, "Failed to parse DASH manifest");
            Vec::new()
        }
    }
}

/// First representation whose id contains `quality`, else the first one.
pub fn select_representation<'a>(
    representations: &'a [Representation],
    quality: &str,
) -> Option<&'a Representation> {
    representations
        .iter()
        .find(|r| !quality.is_empty() && r.id.contains(quality))
        .or_else(|| representations.first())
}

fn walk(data: &[u8]) -> Result<Vec<Representation>, String> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut adaptation: Option<AdaptationContext> = None;
    let mut current: Option<Representation> = None;
    let mut in_base_url = false;
    let mut representations = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                open_element(&name, &e, &stack, &mut adaptation, &mut current)?;
                in_base_url = name == b"BaseURL" && current.is_some();
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name().as_ref().to_vec();
                open_element(&name, &e, &stack, &mut adaptation, &mut current)?;
                close_element(&name, &mut adaptation, &mut current, &mut representations);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if stack.pop().as_deref() != Some(name.as_slice()) {
                    return Err(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(&name)
                    ));
                }
                in_base_url = false;
                close_element(&name, &mut adaptation, &mut current, &mut representations);
            }
            Ok(Event::Text(t)) if in_base_url => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                if let Some(rep) = current.as_mut() {
                    rep.base_url = Some(text.trim().to_string());
                }
            }
            Ok(Event::CData(t)) if in_base_url => {
                let text = String::from_utf8_lossy(&t.into_inner()).trim().to_string();
                if let Some(rep) = current.as_mut() {
                    rep.base_url = Some(text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {e}",
                    reader.error_position()
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(format!("document ended with {} unclosed elements", stack.len()));
    }
    Ok(representations)
}

fn open_element(
    name: &[u8],
    element: &BytesStart<'_>,
    stack: &[Vec<u8>],
    adaptation: &mut Option<AdaptationContext>,
    current: &mut Option<Representation>,
) -> Result<(), String> {
    let inside = |ancestor: &[u8]| stack.iter().any(|open| open.as_slice() == ancestor);

    match name {
        b"AdaptationSet" if inside(b"Period") => {
            *adaptation = Some(AdaptationContext {
                mime_type: attribute(element, b"mimeType")?,
                ..Default::default()
            });
        }
        b"Representation" if adaptation.is_some() && inside(b"AdaptationSet") => {
            *current = Some(Representation {
                id: attribute(element, b"id")?.unwrap_or_default(),
                mime_type: attribute(element, b"mimeType")?,
                ..Default::default()
            });
        }
        b"SegmentTemplate" => {
            let initialization = attribute(element, b"initialization")?;
            let media = attribute(element, b"media")?;
            if let Some(rep) = current.as_mut() {
                rep.initialization = initialization.or(rep.initialization.take());
                rep.media = media.or(rep.media.take());
            } else if let Some(set) = adaptation.as_mut() {
                set.initialization = initialization.or(set.initialization.take());
                set.media = media.or(set.media.take());
            }
        }
        _ => {}
    }
    Ok(())
}

fn close_element(
    name: &[u8],
    adaptation: &mut Option<AdaptationContext>,
    current: &mut Option<Representation>,
    representations: &mut Vec<Representation>,
) {
    match name {
        b"Representation" => {
            if let Some(mut rep) = current.take() {
                if let Some(set) = adaptation.as_ref() {
                    if set.mime_type.is_some() {
                        rep.mime_type = set.mime_type.clone();
                    }
                    if rep.initialization.is_none() {
                        rep.initialization = set.initialization.clone();
                    }
                    if rep.media.is_none() {
                        rep.media = set.media.clone();
                    }
                }
                representations.push(rep);
            }
        }
        b"AdaptationSet" => {
            *adaptation = None;
        }
        _ => {}
    }
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, String> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.local_name().as_ref() == key {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic">
  <Period id="0">
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate initialization="video/init-$RepresentationID$.mp4" media="video/$RepresentationID$-$Number$.m4s"/>
      <Representation id="video_1080p" bandwidth="5000000">
        <BaseURL>https://cdn.test/hd/</BaseURL>
      </Representation>
      <Representation id="video_720p" bandwidth="2500000">
        <SegmentTemplate initialization="init-720.mp4" media="720-$Number$.m4s"/>
      </Representation>
    </AdaptationSet>
    <AdaptationSet>
      <Representation id="audio_en" mimeType="audio/mp4"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn parses_representations_in_document_order() {
        let reps = parse_manifest(MPD.as_bytes());
        let ids: Vec<&str> = reps.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["video_1080p", "video_720p", "audio_en"]);
    }

    #[test]
    fn inherits_adaptation_set_template_and_mime_type() {
        let reps = parse_manifest(MPD.as_bytes());
        assert_eq!(reps[0].mime_type.as_deref(), Some("video/mp4"));
        assert_eq!(
            reps[0].initialization.as_deref(),
            Some("video/init-$RepresentationID$.mp4")
        );
        assert_eq!(reps[0].base_url.as_deref(), Some("https://cdn.test/hd/"));

        assert_eq!(reps[1].initialization.as_deref(), Some("init-720.mp4"));
        assert_eq!(reps[1].media.as_deref(), Some("720-$Number$.m4s"));
        assert_eq!(reps[1].base_url, None);

        assert_eq!(reps[2].mime_type.as_deref(), Some("audio/mp4"));
        assert_eq!(reps[2].media, None);
    }

    #[test]
    fn malformed_xml_yields_empty_list() {
        assert!(parse_manifest(b"<MPD><Period><AdaptationSet></Period></MPD>").is_empty());
        assert!(parse_manifest(b"<MPD><Period>").is_empty());
        assert!(parse_manifest(b"not xml at all").is_empty());
    }

    #[test]
    fn selection_prefers_matching_id_then_first() {
        let reps = parse_manifest(MPD.as_bytes());
        assert_eq!(select_representation(&reps, "720p").unwrap().id, "video_720p");
        assert_eq!(select_representation(&reps, "best").unwrap().id, "video_1080p");
        assert!(select_representation(&[], "best").is_none());
    }
}
