use std::{convert::Infallible, fmt::Display, str::FromStr, time::Duration};

/// One stage of a decoder's audio filter graph.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Filter {
    /// Scales amplitude; `1.0` leaves audio unchanged.
    Volume(f32),
    /// Changes playback speed without altering pitch; `1.0` is normal speed.
    Tempo(f32),
    /// Fades audio in from silence over the given time.
    FadeIn(Duration),
    /// Any other filter, passed to the decoder verbatim.
    Raw(String),
}

impl Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volume(v) => write!(f, "volume={v}"),
            Self::Tempo(t) => write!(f, "atempo={t}"),
            Self::FadeIn(d) => write!(f, "afade=t=in:st=0:d={}", d.as_secs_f64()),
            Self::Raw(s) => f.write_str(s),
        }
    }
}

/// Tempo factors the decoder accepts, and which keep elapsed-time accounting sound.
fn is_valid_tempo(tempo: f32) -> bool {
    tempo.is_finite() && tempo > 0.0
}

impl Filter {
    fn parse(part: &str) -> Self {
        let part = part.trim();

        if let Some(v) = part.strip_prefix("volume=").and_then(|v| v.parse().ok()) {
            return Self::Volume(v);
        }

        if let Some(t) = part
            .strip_prefix("atempo=")
            .and_then(|t| t.parse::<f32>().ok())
            .filter(|t| is_valid_tempo(*t))
        {
            return Self::Tempo(t);
        }

        if let Some(d) = part
            .strip_prefix("afade=t=in:st=0:d=")
            .and_then(|d| d.parse::<f64>().ok())
            .and_then(|d| Duration::try_from_secs_f64(d).ok())
        {
            return Self::FadeIn(d);
        }

        Self::Raw(part.to_string())
    }
}

/// An ordered audio filter graph applied by the decoder.
///
/// Renders to the decoder's `-af` argument via [`Display`], and can be rebuilt
/// from such a string with [`FromStr`]. Unrecognised stages are kept as
/// [`Filter::Raw`], so parsing never fails.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    /// Creates an empty chain, which leaves audio untouched.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a volume stage.
    #[must_use]
    pub fn volume(self, volume: f32) -> Self {
        self.push(Filter::Volume(volume))
    }

    /// Appends a tempo stage.
    ///
    /// A factor which is not finite and positive is kept as a [`Filter::Raw`]
    /// stage, exactly as if it had been parsed.
    #[must_use]
    pub fn tempo(self, tempo: f32) -> Self {
        if is_valid_tempo(tempo) {
            self.push(Filter::Tempo(tempo))
        } else {
            self.push(Filter::Raw(format!("atempo={tempo}")))
        }
    }

    /// Appends a fade-in stage.
    #[must_use]
    pub fn fade_in(self, length: Duration) -> Self {
        self.push(Filter::FadeIn(length))
    }

    /// Appends a stage passed to the decoder verbatim.
    #[must_use]
    pub fn raw(self, filter: impl Into<String>) -> Self {
        self.push(Filter::Raw(filter.into()))
    }

    /// Appends any stage.
    #[must_use]
    pub fn push(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Returns the stages of this chain, in order.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns whether this chain has no stages.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Returns how much source audio one second of output covers.
    ///
    /// This is the product of all valid tempo stages, so a `1.5` tempo means
    /// each 20ms frame advances the source position by 30ms.
    pub fn tempo_factor(&self) -> f64 {
        self.filters
            .iter()
            .filter_map(|f| match f {
                Filter::Tempo(t) if is_valid_tempo(*t) => Some(f64::from(*t)),
                _ => None,
            })
            .product()
    }
}

impl Display for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, filter) in self.filters.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            write!(f, "{filter}")?;
        }

        Ok(())
    }
}

impl FromStr for FilterChain {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            filters: s
                .split(',')
                .filter(|part| !part.trim().is_empty())
                .map(Filter::parse)
                .collect(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn renders_decoder_filter_string() {
        let chain = FilterChain::new()
            .volume(0.5)
            .tempo(1.25)
            .fade_in(Duration::from_secs(3))
            .raw("bass=g=5");

        assert_eq!(
            chain.to_string(),
            "volume=0.5,atempo=1.25,afade=t=in:st=0:d=3,bass=g=5"
        );
    }

    #[test]
    fn parses_known_and_raw_stages() {
        let chain: FilterChain = "volume=0.8, atempo=1.5,aecho=0.8:0.9:1000:0.3,,"
            .parse()
            .unwrap();

        assert_eq!(chain.filters(), &[
            Filter::Volume(0.8),
            Filter::Tempo(1.5),
            Filter::Raw("aecho=0.8:0.9:1000:0.3".into()),
        ]);
    }

    #[test]
    fn invalid_tempo_is_kept_raw() {
        let chain: FilterChain = "atempo=0".parse().unwrap();

        assert_eq!(chain.filters(), &[Filter::Raw("atempo=0".into())]);
        assert_eq!(chain.tempo_factor(), 1.0);
    }

    #[test]
    fn builder_rejects_unusable_tempo() {
        let chain = FilterChain::new()
            .tempo(-2.0)
            .tempo(0.0)
            .tempo(f32::NAN)
            .push(Filter::Tempo(f32::INFINITY));

        assert!(!chain.filters().iter().take(3).any(|f| matches!(f, Filter::Tempo(_))));
        assert_eq!(chain.filters()[0], Filter::Raw("atempo=-2".into()));
        assert_eq!(chain.tempo_factor(), 1.0);
    }

    #[test]
    fn tempo_factor_multiplies_stages() {
        let chain = FilterChain::new().tempo(2.0).volume(3.0).tempo(0.75);
        assert!((chain.tempo_factor() - 1.5).abs() < f64::EPSILON);

        assert_eq!(FilterChain::new().tempo_factor(), 1.0);
    }

    #[test]
    fn render_then_parse_is_stable() {
        let chain = FilterChain::new()
            .fade_in(Duration::from_millis(1500))
            .tempo(0.5);

        assert_eq!(chain.to_string().parse::<FilterChain>().unwrap(), chain);
    }
}
