use super::params::GenerationParams;

pub use candle_transformers::generation::{LogitsProcessor, Sampling};

/// Pick the sampling strategy for `params`. Sampling is always stochastic;
/// top-k and top-p are applied together whenever both are active.
pub fn sampling_for(params: &GenerationParams) -> Sampling {
    let temperature = params.temperature;
    let top_k_active = params.top_k > 0;
    let top_p_active = params.top_p < 1.0;

    match (top_k_active, top_p_active) {
        (true, true) => Sampling::TopKThenTopP {
            k: params.top_k,
            p: params.top_p,
            temperature,
        },
        (true, false) => Sampling::TopK {
            k: params.top_k,
            temperature,
        },
        (false, true) => Sampling::TopP {
            p: params.top_p,
            temperature,
        },
        (false, false) => Sampling::All { temperature },
    }
}

pub fn initialize_logits_processor(params: &GenerationParams, seed: u64) -> LogitsProcessor {
    LogitsProcessor::from_sampling(seed, sampling_for(params))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(top_k: usize, top_p: f64) -> GenerationParams {
        GenerationParams::new(1.0, 1.0, 0, 16, top_p, top_k)
    }

    #[test]
    fn uses_top_k_and_top_p_jointly() {
        assert!(matches!(
            sampling_for(&params(5, 0.95)),
            Sampling::TopKThenTopP { k: 5, .. }
        ));
    }

    #[test]
    fn zero_top_k_disables_top_k() {
        assert!(matches!(sampling_for(&params(0, 0.9)), Sampling::TopP { .. }));
    }

    #[test]
    fn full_top_p_disables_nucleus() {
        assert!(matches!(sampling_for(&params(40, 1.0)), Sampling::TopK { k: 40, .. }));
        assert!(matches!(sampling_for(&params(0, 1.0)), Sampling::All { .. }));
    }
}
