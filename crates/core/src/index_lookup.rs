//! Illumina index name to barcode sequence lookup.
//!
//! Mappings follow the Illumina documentation dated 2011-10-11:
//! `index1..index27` from "TruSeq RNA and DNA Sample Prep Kits" and
//! `rpi1..rpi48` from "TruSeq Small RNA Sample Prep Kits" after
//! reverse-complement conversion. `index17`, `index24` and `index26` are
//! reserved by Illumina and have no sequence.

const TRUSEQ: &[(u32, &str)] = &[
    (1, "ATCACG"),
    (2, "CGATGT"),
    (3, "TTAGGC"),
    (4, "TGACCA"),
    (5, "ACAGTG"),
    (6, "GCCAAT"),
    (7, "CAGATC"),
    (8, "ACTTGA"),
    (9, "GATCAG"),
    (10, "TAGCTT"),
    (11, "GGCTAC"),
    (12, "CTTGTA"),
    (13, "AGTCAA"),
    (14, "AGTTCC"),
    (15, "ATGTCA"),
    (16, "CCGTCC"),
    (18, "GTCCGC"),
    (19, "GTGAAA"),
    (20, "GTGGCC"),
    (21, "GTTTCG"),
    (22, "CGTACG"),
    (23, "GAGTGG"),
    (25, "ACTGAT"),
    (27, "ATTCCT"),
];

const SMALL_RNA: [&str; 48] = [
    "ATCACG", "CGATGT", "TTAGGC", "TGACCA", "ACAGTG", "GCCAAT", "CAGATC", "ACTTGA", "GATCAG",
    "TAGCTT", "GGCTAC", "CTTGTA", "AGTCAA", "AGTTCC", "ATGTCA", "CCGTCC", "GTAGAG", "GTCCGC",
    "GTGAAA", "GTGGCC", "GTTTCG", "CGTACG", "GAGTGG", "GGTAGC", "ACTGAT", "ATGAGC", "ATTCCT",
    "CAAAAG", "CAACTA", "CACCGG", "CACGAT", "CACTCA", "CAGGCG", "CATGGC", "CATTTT", "CAAACA",
    "CGGAAT", "CTAGCT", "CTATAC", "CTCAGA", "GACGAC", "TAATCG", "TACAGC", "TATAAT", "TCATTC",
    "TCCCGA", "TCGAAG", "TCGGCA",
];

/// Resolve an index name to its barcode sequence.
///
/// Accepts `indexN`, `idxN`, `inN` and bare `N` for TruSeq indexes and
/// `rpiN` or `rN` for small RNA indexes, in any letter case.
pub fn lookup(name: &str) -> Option<&'static str> {
    let lower = name.trim().to_ascii_lowercase();

    if let Some(n) = strip_number(&lower, &["rpi", "r"]) {
        return n
            .checked_sub(1)
            .and_then(|i| SMALL_RNA.get(i as usize))
            .copied();
    }

    let n = strip_number(&lower, &["index", "idx", "in", ""])?;
    TRUSEQ
        .iter()
        .find(|(idx, _)| *idx == n)
        .map(|(_, seq)| *seq)
}

/// Whether `s` already looks like a nucleotide barcode.
pub fn is_sequence(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'N'))
}

/// Return the sequence for `value`: itself when already a sequence,
/// otherwise the looked-up index.
///
/// A dual index is written as two halves joined by `-` (`ACGTAC-TGCATG`,
/// `index2-index5`); each half is normalised on its own.
pub fn normalize(value: &str) -> Option<String> {
    let value = value.trim();
    match value.split_once('-') {
        Some((first, second)) => {
            let first = single(first)?;
            let second = single(second)?;
            Some(format!("{first}-{second}"))
        }
        None => single(value),
    }
}

fn single(value: &str) -> Option<String> {
    let value = value.trim();
    if is_sequence(value) {
        Some(value.to_ascii_uppercase())
    } else {
        lookup(value).map(str::to_string)
    }
}

fn strip_number(s: &str, prefixes: &[&str]) -> Option<u32> {
    prefixes
        .iter()
        .filter_map(|p| s.strip_prefix(p))
        .find(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|rest| rest.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truseq_aliases_resolve_identically() {
        for name in ["index4", "INDEX4", "idx4", "IN4", "4"] {
            assert_eq!(lookup(name), Some("TGACCA"), "alias {name}");
        }
    }

    #[test]
    fn small_rna_aliases_resolve() {
        assert_eq!(lookup("rpi17"), Some("GTAGAG"));
        assert_eq!(lookup("R48"), Some("TCGGCA"));
        assert_eq!(lookup("RPI1"), Some("ATCACG"));
    }

    #[test]
    fn reserved_and_out_of_range_indexes_are_unknown() {
        assert_eq!(lookup("index17"), None);
        assert_eq!(lookup("index24"), None);
        assert_eq!(lookup("index28"), None);
        assert_eq!(lookup("rpi0"), None);
        assert_eq!(lookup("rpi49"), None);
        assert_eq!(lookup("banana"), None);
    }

    #[test]
    fn normalize_keeps_sequences_and_resolves_names() {
        assert_eq!(normalize("acagtg").as_deref(), Some("ACAGTG"));
        assert_eq!(normalize("index5").as_deref(), Some("ACAGTG"));
        assert_eq!(normalize("mystery"), None);
    }

    #[test]
    fn dual_indexes_keep_both_halves() {
        assert_eq!(normalize("acgt-tgca").as_deref(), Some("ACGT-TGCA"));
        assert_eq!(normalize("index1-CGATGT").as_deref(), Some("ATCACG-CGATGT"));
        assert_eq!(normalize("ACGT-"), None);
        assert_eq!(normalize("ACGT-TGCA-GG"), None);
        assert_eq!(normalize("ACGT-mystery"), None);
    }
}
