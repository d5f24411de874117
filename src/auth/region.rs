/// Airport-style short codes reported by the instance metadata service and accepted in
/// profile secrets, mapped to region identifiers.
const REGION_CODES: &[(&str, &str)] = &[
    ("aga", "us-saltlake-2"),
    ("ams", "eu-amsterdam-1"),
    ("arn", "eu-stockholm-1"),
    ("auh", "me-abudhabi-1"),
    ("beg", "eu-jovanovac-1"),
    ("bgy", "eu-dcc-milan-1"),
    ("bog", "sa-bogota-1"),
    ("bom", "ap-mumbai-1"),
    ("brs", "uk-gov-cardiff-1"),
    ("cdg", "eu-paris-1"),
    ("cwl", "uk-cardiff-1"),
    ("dac", "ap-dcc-gazipur-1"),
    ("doh", "me-dcc-doha-1"),
    ("dtm", "eu-dcc-rating-2"),
    ("dus", "eu-dcc-rating-1"),
    ("dxb", "me-dubai-1"),
    ("ebb", "us-somerset-1"),
    ("ebl", "us-thames-1"),
    ("fra", "eu-frankfurt-1"),
    ("gru", "sa-saopaulo-1"),
    ("hyd", "ap-hyderabad-1"),
    ("iad", "us-ashburn-1"),
    ("icn", "ap-seoul-1"),
    ("jed", "me-jeddah-1"),
    ("jnb", "af-johannesburg-1"),
    ("kix", "ap-osaka-1"),
    ("lfi", "us-langley-1"),
    ("lhr", "uk-london-1"),
    ("lin", "eu-milan-1"),
    ("ltn", "uk-gov-london-1"),
    ("luf", "us-luke-1"),
    ("mad", "eu-madrid-1"),
    ("mct", "me-dcc-muscat-1"),
    ("mel", "ap-melbourne-1"),
    ("mrs", "eu-marseille-1"),
    ("mty", "mx-monterrey-1"),
    ("mtz", "il-jerusalem-1"),
    ("mxp", "eu-dcc-milan-2"),
    ("nja", "ap-chiyoda-1"),
    ("nrt", "ap-tokyo-1"),
    ("ord", "us-chicago-1"),
    ("ork", "eu-dcc-dublin-1"),
    ("phx", "us-phoenix-1"),
    ("pia", "us-gov-chicago-1"),
    ("qro", "mx-queretaro-1"),
    ("ric", "us-gov-ashburn-1"),
    ("ruh", "me-riyadh-1"),
    ("scl", "sa-santiago-1"),
    ("sgu", "us-westjordan-1"),
    ("sin", "ap-singapore-1"),
    ("sjc", "us-sanjose-1"),
    ("snn", "eu-dcc-dublin-2"),
    ("str", "eu-frankfurt-2"),
    ("syd", "ap-sydney-1"),
    ("tus", "us-gov-phoenix-1"),
    ("ukb", "ap-ibaraki-1"),
    ("vap", "sa-valparaiso-1"),
    ("vcp", "sa-vinhedo-1"),
    ("vll", "eu-madrid-2"),
    ("wga", "ap-dcc-canberra-1"),
    ("xsp", "ap-singapore-2"),
    ("yny", "ap-chuncheon-1"),
    ("yul", "ca-montreal-1"),
    ("yyz", "ca-toronto-1"),
    ("zrh", "eu-zurich-1"),
];

/// Expands a short region code (`iad`) to its identifier (`us-ashburn-1`).
///
/// Identifiers and unknown values are returned trimmed and lowercased.
pub fn canonical_region(region: &str) -> String {
    let region = region.trim().to_lowercase();
    REGION_CODES
        .binary_search_by(|(code, _)| (*code).cmp(region.as_str()))
        .map(|i| REGION_CODES[i].1.to_owned())
        .unwrap_or(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_and_unique() {
        assert!(REGION_CODES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn canonicalizes_region_codes() {
        assert_eq!(canonical_region("iad"), "us-ashburn-1");
        assert_eq!(canonical_region(" PHX\n"), "us-phoenix-1");
        assert_eq!(canonical_region("eu-frankfurt-1"), "eu-frankfurt-1");
    }

    #[test]
    fn recent_regions_resolve() {
        assert_eq!(canonical_region("mty"), "mx-monterrey-1");
        assert_eq!(canonical_region("qro"), "mx-queretaro-1");
        assert_eq!(canonical_region("sgu"), "us-westjordan-1");
        assert_eq!(canonical_region("aga"), "us-saltlake-2");
        assert_eq!(canonical_region("jnb"), "af-johannesburg-1");
    }
}
