//! Symbol alphabets for stored sequences.
//!
//! Two fixed enumerations are supported: [`Nucleotide`] (16 symbols, IUPAC
//! codes) and [`AminoAcid`] (21 symbols: gap plus the 20 canonical residues).
//! Both implement the [`Alphabet`] trait, which gives the columnar store and
//! the filter compiler a uniform view of:
//!
//! - symbol ↔ character conversion,
//! - symbol ↔ dense index conversion (bitmap slots),
//! - ambiguity expansion: which unambiguous base symbols a symbol covers.
//!
//! ## Ambiguity matching
//!
//! A query symbol is matched against stored symbols according to an
//! [`AmbiguityMode`]:
//!
//! - `None`: only the exact stored symbol matches.
//! - `UpperBound`: every stored symbol whose expansion *intersects* the query
//!   symbol's expansion matches (the stored symbol could be the queried one).
//! - `LowerBound`: every stored symbol whose expansion is *contained in* the
//!   query symbol's expansion matches (the stored symbol definitely is one of
//!   the queried bases).

mod amino_acid;
mod nucleotide;

pub use amino_acid::AminoAcid;
pub use nucleotide::Nucleotide;

use std::fmt::Debug;
use std::hash::Hash;

/// Controls how ambiguity codes in a query match stored symbols.
///
/// Swaps `UpperBound` and `LowerBound` under negation so that
/// `Not(Maybe(x))` keeps its permissive reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityMode {
    /// Strict symbol match.
    None,
    /// Match any stored symbol that could represent the query symbol.
    UpperBound,
    /// Match only stored symbols that certainly represent the query symbol.
    LowerBound,
}

impl AmbiguityMode {
    /// The mode seen by a negated subexpression.
    pub fn swapped(self) -> Self {
        match self {
            AmbiguityMode::None => AmbiguityMode::None,
            AmbiguityMode::UpperBound => AmbiguityMode::LowerBound,
            AmbiguityMode::LowerBound => AmbiguityMode::UpperBound,
        }
    }
}

/// A fixed symbol enumeration with ambiguity structure.
pub trait Alphabet:
    Copy + Clone + Eq + PartialEq + Hash + Debug + Send + Sync + Sized + 'static
{
    /// Number of symbols in the alphabet.
    const COUNT: usize;

    /// Human-readable name used in error messages.
    const NAME: &'static str;

    /// The symbol a row reads as at positions with no sequence data.
    const MISSING: Self;

    /// The alignment gap.
    const GAP: Self;

    /// All symbols, in index order.
    fn symbols() -> &'static [Self];

    /// Dense index of the symbol, in `0..COUNT`.
    fn index(self) -> usize;

    /// Symbol for a dense index. Panics on out-of-range input.
    fn from_index(index: usize) -> Self;

    /// Character representation.
    fn to_char(self) -> char;

    /// Parse a character; `None` for characters outside the alphabet.
    fn from_char(character: char) -> Option<Self>;

    /// The unambiguous base symbols this symbol covers. A base symbol (or the
    /// gap) expands to itself.
    fn expansion(self) -> &'static [Self];

    /// Whether the symbol is a single concrete base (expansion of length one
    /// that is the symbol itself).
    fn is_base(self) -> bool {
        let expansion = self.expansion();
        expansion.len() == 1 && expansion[0] == self
    }

    /// First character of `sequence` that is not part of the alphabet.
    fn find_illegal_char(sequence: &str) -> Option<char> {
        sequence.chars().find(|&c| Self::from_char(c).is_none())
    }

    /// Parse a whole sequence into symbols.
    fn parse_sequence(sequence: &str) -> Option<Vec<Self>> {
        sequence.chars().map(Self::from_char).collect()
    }
}

/// Stored symbols that match `query` under `mode`.
///
/// The result preserves alphabet index order, so compiled plans are
/// deterministic for a given query.
pub fn symbols_matching<A: Alphabet>(query: A, mode: AmbiguityMode) -> Vec<A> {
    match mode {
        AmbiguityMode::None => vec![query],
        AmbiguityMode::UpperBound => A::symbols()
            .iter()
            .copied()
            .filter(|stored| {
                stored
                    .expansion()
                    .iter()
                    .any(|base| query.expansion().contains(base))
            })
            .collect(),
        AmbiguityMode::LowerBound => A::symbols()
            .iter()
            .copied()
            .filter(|stored| {
                stored
                    .expansion()
                    .iter()
                    .all(|base| query.expansion().contains(base))
            })
            .collect(),
    }
}

/// A dense map from alphabet symbols to values, one slot per symbol.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(bound(
    serialize = "T: serde::Serialize",
    deserialize = "T: serde::de::DeserializeOwned"
))]
pub struct SymbolMap<A: Alphabet, T> {
    data: Vec<T>,
    #[serde(skip)]
    _alphabet: std::marker::PhantomData<A>,
}

impl<A: Alphabet, T: Default + Clone> Default for SymbolMap<A, T> {
    fn default() -> Self {
        SymbolMap {
            data: vec![T::default(); A::COUNT],
            _alphabet: std::marker::PhantomData,
        }
    }
}

impl<A: Alphabet, T> SymbolMap<A, T> {
    pub fn get(&self, symbol: A) -> &T {
        &self.data[symbol.index()]
    }

    pub fn get_mut(&mut self, symbol: A) -> &mut T {
        &mut self.data[symbol.index()]
    }

    /// Iterate `(symbol, value)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (A, &T)> {
        self.data
            .iter()
            .enumerate()
            .map(|(index, value)| (A::from_index(index), value))
    }

    /// Consume the map into its per-symbol values, in index order.
    pub fn into_inner(self) -> Vec<T> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nucleotide_roundtrip() {
        for &symbol in Nucleotide::symbols() {
            assert_eq!(Nucleotide::from_char(symbol.to_char()), Some(symbol));
            assert_eq!(Nucleotide::from_index(symbol.index()), symbol);
        }
        assert_eq!(Nucleotide::symbols().len(), Nucleotide::COUNT);
    }

    #[test]
    fn test_amino_acid_roundtrip() {
        for &symbol in AminoAcid::symbols() {
            assert_eq!(AminoAcid::from_char(symbol.to_char()), Some(symbol));
            assert_eq!(AminoAcid::from_index(symbol.index()), symbol);
        }
        assert_eq!(AminoAcid::symbols().len(), AminoAcid::COUNT);
    }

    #[test]
    fn test_illegal_char_detection() {
        assert_eq!(Nucleotide::find_illegal_char("ACGTN-"), None);
        assert_eq!(Nucleotide::find_illegal_char("ACGJ"), Some('J'));
        assert_eq!(AminoAcid::find_illegal_char("MFVFLV"), None);
        assert_eq!(AminoAcid::find_illegal_char("MFX"), Some('X'));
    }

    #[test]
    fn test_ambiguity_expansion() {
        assert_eq!(
            Nucleotide::R.expansion(),
            &[Nucleotide::A, Nucleotide::G]
        );
        assert_eq!(
            Nucleotide::N.expansion(),
            &[Nucleotide::A, Nucleotide::C, Nucleotide::G, Nucleotide::T]
        );
        assert!(Nucleotide::A.is_base());
        assert!(!Nucleotide::R.is_base());
    }

    #[test]
    fn test_upper_bound_matching() {
        // A stored A or any ambiguity code covering A could be an A.
        let matches = symbols_matching(Nucleotide::A, AmbiguityMode::UpperBound);
        assert!(matches.contains(&Nucleotide::A));
        assert!(matches.contains(&Nucleotide::R));
        assert!(matches.contains(&Nucleotide::N));
        assert!(!matches.contains(&Nucleotide::C));
        assert!(!matches.contains(&Nucleotide::Gap));
    }

    #[test]
    fn test_lower_bound_matching() {
        // Only symbols certainly within {A, G} match R strictly.
        let matches = symbols_matching(Nucleotide::R, AmbiguityMode::LowerBound);
        assert_eq!(
            matches,
            vec![Nucleotide::A, Nucleotide::G, Nucleotide::R]
        );
    }

    #[test]
    fn test_none_matching_is_exact() {
        assert_eq!(
            symbols_matching(Nucleotide::T, AmbiguityMode::None),
            vec![Nucleotide::T]
        );
    }

    #[test]
    fn test_mode_swap() {
        assert_eq!(
            AmbiguityMode::UpperBound.swapped(),
            AmbiguityMode::LowerBound
        );
        assert_eq!(AmbiguityMode::None.swapped(), AmbiguityMode::None);
    }

    #[test]
    fn test_symbol_map_slots() {
        let mut map: SymbolMap<Nucleotide, u32> = SymbolMap::default();
        *map.get_mut(Nucleotide::G) = 7;
        assert_eq!(*map.get(Nucleotide::G), 7);
        assert_eq!(*map.get(Nucleotide::A), 0);
    }
}
