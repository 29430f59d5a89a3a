use serde::Serialize;

/// Histogram bin for the number of times one trip was observed in a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum OccurrenceBucket {
    #[serde(rename = "1-10")]
    OneToTen,
    #[serde(rename = "11-20")]
    ElevenToTwenty,
    #[serde(rename = "21-50")]
    TwentyOneToFifty,
    #[serde(rename = "51-1000")]
    FiftyOneToThousand,
}

impl OccurrenceBucket {
    pub const ALL: [OccurrenceBucket; 4] = [
        OccurrenceBucket::OneToTen,
        OccurrenceBucket::ElevenToTwenty,
        OccurrenceBucket::TwentyOneToFifty,
        OccurrenceBucket::FiftyOneToThousand,
    ];

    pub fn label(self) -> &'static str {
        match self {
            OccurrenceBucket::OneToTen => "1-10",
            OccurrenceBucket::ElevenToTwenty => "11-20",
            OccurrenceBucket::TwentyOneToFifty => "21-50",
            OccurrenceBucket::FiftyOneToThousand => "51-1000",
        }
    }

    /// Position in [`OccurrenceBucket::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Assigns an observation count to its bucket.
///
/// | Count      | Bucket  |
/// |------------|---------|
/// | 1..=10     | 1-10    |
/// | 11..=20    | 11-20   |
/// | 21..=50    | 21-50   |
/// | 51..=1000  | 51-1000 |
/// | 0, > 1000  | none    |
pub fn bucket(count: usize) -> Option<OccurrenceBucket> {
    match count {
        1..=10 => Some(OccurrenceBucket::OneToTen),
        11..=20 => Some(OccurrenceBucket::ElevenToTwenty),
        21..=50 => Some(OccurrenceBucket::TwentyOneToFifty),
        51..=1000 => Some(OccurrenceBucket::FiftyOneToThousand),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(bucket(0), None);
        assert_eq!(bucket(1), Some(OccurrenceBucket::OneToTen));
        assert_eq!(bucket(10), Some(OccurrenceBucket::OneToTen));
        assert_eq!(bucket(11), Some(OccurrenceBucket::ElevenToTwenty));
        assert_eq!(bucket(20), Some(OccurrenceBucket::ElevenToTwenty));
        assert_eq!(bucket(21), Some(OccurrenceBucket::TwentyOneToFifty));
        assert_eq!(bucket(50), Some(OccurrenceBucket::TwentyOneToFifty));
        assert_eq!(bucket(51), Some(OccurrenceBucket::FiftyOneToThousand));
        assert_eq!(bucket(1000), Some(OccurrenceBucket::FiftyOneToThousand));
        assert_eq!(bucket(1001), None);
    }

    #[test]
    fn test_labels_follow_index_order() {
        let labels: Vec<_> = OccurrenceBucket::ALL.iter().map(|b| b.label()).collect();
        assert_eq!(labels, vec!["1-10", "11-20", "21-50", "51-1000"]);
        for (i, b) in OccurrenceBucket::ALL.iter().enumerate() {
            assert_eq!(b.index(), i);
        }
    }
}
