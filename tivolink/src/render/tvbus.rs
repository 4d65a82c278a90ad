//! TvBus recording envelope (the video details document).

use quick_xml::escape::escape;

use crate::video::ResolvedDetails;

const NAMESPACES: &[(&str, &str)] = &[
    ("xs", "http://www.w3.org/2001/XMLSchema-instance"),
    ("TvBusMarshalledStruct", "http://tivo.com/developer/xml/idl/TvBusMarshalledStruct"),
    ("TvPgdRecording", "http://tivo.com/developer/xml/idl/TvPgdRecording"),
    ("TvBusDuration", "http://tivo.com/developer/xml/idl/TvBusDuration"),
    ("TvPgdShowing", "http://tivo.com/developer/xml/idl/TvPgdShowing"),
    ("TvDbShowingBit", "http://tivo.com/developer/xml/idl/TvDbShowingBit"),
    ("TvBusDateTime", "http://tivo.com/developer/xml/idl/TvBusDateTime"),
    ("TvPgdProgram", "http://tivo.com/developer/xml/idl/TvPgdProgram"),
    ("TvDbColorCode", "http://tivo.com/developer/xml/idl/TvDbColorCode"),
    ("TvPgdSeries", "http://tivo.com/developer/xml/idl/TvPgdSeries"),
    ("TvDbShowType", "http://tivo.com/developer/xml/idl/TvDbShowType"),
    ("TvPgdChannel", "http://tivo.com/developer/xml/idl/TvPgdChannel"),
    ("TvDbTvRating", "http://tivo.com/developer/xml/idl/TvDbTvRating"),
    ("TvDbMpaaRating", "http://tivo.com/developer/xml/idl/TvDbMpaaRating"),
];

/// Render the details envelope for one recording.
pub fn tvbus(d: &ResolvedDetails) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<TvBusMarshalledStruct:TvBusEnvelope");
    for (prefix, uri) in NAMESPACES {
        out.push_str(&format!(" xmlns:{}=\"{}\"", prefix, uri));
    }
    out.push_str(" xs:type=\"TvPgdRecording:TvPgdRecording\">\n");

    out.push_str(&format!(
        "<recordedDuration>{}</recordedDuration>\n",
        d.iso_duration
    ));
    out.push_str("<vActualShowing/>\n<vBookmark/>\n");
    out.push_str("<recordingQuality value=\"75\">HIGH</recordingQuality>\n");
    out.push_str("<showing>\n");
    out.push_str(&format!(
        "<showingBits value=\"{}\"/>\n<time>{}</time>\n<duration>{}</duration>\n",
        d.showing_bits,
        escape(d.time.as_str()),
        d.iso_duration
    ));
    out.push_str(&program(d));
    out.push_str(&format!(
        "<channel>\n\
         <displayMajorNumber>{}</displayMajorNumber>\n\
         <displayMinorNumber>{}</displayMinorNumber>\n\
         <callsign>{}</callsign>\n\
         </channel>\n",
        escape(d.display_major_number.as_str()),
        escape(d.display_minor_number.as_str()),
        escape(d.call_sign.as_str())
    ));
    if !d.tv_rating.is_empty() {
        out.push_str(&format!(
            "<tvRating value=\"{0}\">{0}</tvRating>\n",
            escape(d.tv_rating.as_str())
        ));
    }
    out.push_str("</showing>\n");
    out.push_str(&format!(
        "<startTime>{}</startTime>\n<stopTime>{}</stopTime>\n",
        d.start_time, d.stop_time
    ));
    out.push_str("</TvBusMarshalledStruct:TvBusEnvelope>");
    out
}

fn program(d: &ResolvedDetails) -> String {
    let mut out = String::from("<program>\n");
    out.push_str(&list(d, "vActor"));
    out.push_str(&list(d, "vChoreographer"));
    out.push_str(&format!(
        "<colorCode value=\"{}\">{}</colorCode>\n",
        d.color.1, d.color.0
    ));
    out.push_str(&element("description", &d.description));
    out.push_str(&list(d, "vDirector"));
    out.push_str(&element("episodeNumber", &d.episode_number));
    out.push_str(&element("episodeTitle", &d.episode_title));
    out.push_str(&list(d, "vExecProducer"));
    out.push_str(&list(d, "vProgramGenre"));
    out.push_str(&list(d, "vGuestStar"));
    out.push_str(&list(d, "vHost"));
    out.push_str(&format!("<isEpisode>{}</isEpisode>\n", d.is_episode));
    if !d.movie_year.is_empty() {
        out.push_str(&element("movieYear", &d.movie_year));
    }
    if !d.mpaa_rating.is_empty() {
        out.push_str(&format!(
            "<mpaaRating value=\"{0}\">{0}</mpaaRating>\n",
            escape(d.mpaa_rating.as_str())
        ));
    }
    out.push_str(&element("originalAirDate", &d.original_air_date));
    out.push_str(&list(d, "vProducer"));
    out.push_str(&format!(
        "<series>\n<isEpisodic>{}</isEpisodic>\n{}{}{}</series>\n",
        d.is_episode,
        list(d, "vSeriesGenre"),
        element("seriesTitle", &d.series_title),
        element("uniqueId", &d.series_id),
    ));
    out.push_str(&format!(
        "<showType value=\"{}\">{}</showType>\n",
        d.show_type.1, d.show_type.0
    ));
    if !d.star_rating.is_empty() {
        out.push_str(&format!(
            "<starRating value=\"{0}\">{0}</starRating>\n",
            escape(d.star_rating.as_str())
        ));
    }
    out.push_str(&element("title", &d.title));
    out.push_str(&element("uniqueId", &d.program_id));
    out.push_str(&list(d, "vWriter"));
    out.push_str("</program>\n");
    out
}

fn element(tag: &str, value: &str) -> String {
    format!("<{tag}>{}</{tag}>\n", escape(value))
}

fn list(d: &ResolvedDetails, key: &str) -> String {
    let values = d.list(key);
    if values.is_empty() {
        return format!("<{key}/>\n");
    }
    let mut out = format!("<{key}>\n");
    for value in values {
        out.push_str(&format!("<element>{}</element>\n", escape(value.as_str())));
    }
    out.push_str(&format!("</{key}>\n"));
    out
}
