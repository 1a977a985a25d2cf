// Integration tests for the generation service, run against a mock model and
// a word-level tokenizer so no weights are downloaded.

mod common;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use common::{scenario_config, word_tokenizer, Behaviour, MockModel};
use textgen::models::implementations::gpt2::Config;
use textgen::{
    generate_text, generate_tokens, GenerationError, Gpt2Model, InvalidParameter,
    TextGenerationPipeline,
};

#[test]
fn returns_one_string_per_requested_sequence() -> anyhow::Result<()> {
    let model = MockModel::new(Behaviour::Words);
    let tokenizer = word_tokenizer();

    for n in [1, 2, 5] {
        let config = textgen::GenerationConfig {
            num_return_sequences: n,
            max_length: 12,
            ..scenario_config()
        };
        let out = generate_text("Once upon a time", &model, &tokenizer, &config)?;
        assert_eq!(out.len(), n);
    }
    Ok(())
}

#[test]
fn scenario_yields_three_bounded_non_empty_variants() -> anyhow::Result<()> {
    let model = MockModel::new(Behaviour::Words);
    let tokenizer = word_tokenizer();
    let config = scenario_config();

    let sequences = generate_tokens("Once upon a time", &model, &tokenizer, &config)?;
    assert_eq!(sequences.len(), 3);
    for tokens in &sequences {
        assert!(tokens.len() <= 50, "sequence of {} tokens", tokens.len());
        assert_eq!(&tokens[..4], &[2, 3, 4, 5]);
    }

    let texts = generate_text("Once upon a time", &model, &tokenizer, &config)?;
    assert_eq!(texts.len(), 3);
    for text in &texts {
        assert!(!text.trim().is_empty());
        assert!(text.starts_with("Once upon a time"));
        let decoded_len = tokenizer
            .encode(text.as_str(), false)
            .map_err(anyhow::Error::msg)?
            .len();
        assert!(decoded_len <= 50);
    }
    Ok(())
}

#[test]
fn special_tokens_never_reach_the_output() -> anyhow::Result<()> {
    let model = MockModel::new(Behaviour::EndOfText);
    let tokenizer = word_tokenizer();

    let sequences = generate_tokens("Once upon a time", &model, &tokenizer, &scenario_config())?;
    for tokens in &sequences {
        assert_eq!(tokens.last(), Some(&common::EOS));
    }

    let texts = generate_text("Once upon a time", &model, &tokenizer, &scenario_config())?;
    for text in &texts {
        assert!(!text.contains("<|endoftext|>"));
        assert_eq!(text, "Once upon a time");
    }
    Ok(())
}

#[test]
fn empty_prompt_still_yields_every_sequence() -> anyhow::Result<()> {
    let model = MockModel::new(Behaviour::Words);
    let tokenizer = word_tokenizer();
    let config = textgen::GenerationConfig {
        max_length: 10,
        ..scenario_config()
    };

    let texts = generate_text("", &model, &tokenizer, &config)?;
    assert_eq!(texts.len(), 3);
    for text in &texts {
        assert!(!text.trim().is_empty());
        assert!(!text.contains("<|endoftext|>"));
    }
    Ok(())
}

#[test]
fn empty_prompt_fits_the_smallest_max_length() -> anyhow::Result<()> {
    let model = MockModel::new(Behaviour::Words);
    let tokenizer = word_tokenizer();
    let config = textgen::GenerationConfig {
        max_length: 1,
        ..scenario_config()
    };

    let sequences = generate_tokens("", &model, &tokenizer, &config)?;
    assert_eq!(sequences.len(), 3);
    // The BOS seed is not part of the result.
    assert!(sequences.iter().all(|tokens| tokens.len() == 1 && tokens[0] != common::EOS));

    let texts = generate_text("", &model, &tokenizer, &config)?;
    assert_eq!(texts.len(), 3);
    assert!(texts.iter().all(|text| !text.trim().is_empty()));
    Ok(())
}

#[test]
fn empty_prompt_may_use_the_whole_context_window() -> anyhow::Result<()> {
    let model = MockModel::new(Behaviour::Words);
    let tokenizer = word_tokenizer();
    let config = textgen::GenerationConfig {
        max_length: 64,
        ..scenario_config()
    };

    let sequences = generate_tokens("", &model, &tokenizer, &config)?;
    assert!(sequences.iter().all(|tokens| tokens.len() == 64));
    Ok(())
}

#[test]
fn sequences_stop_at_max_length() -> anyhow::Result<()> {
    let model = MockModel::new(Behaviour::Words);
    let tokenizer = word_tokenizer();
    let config = textgen::GenerationConfig {
        max_length: 7,
        ..scenario_config()
    };

    let sequences = generate_tokens("Once upon a time", &model, &tokenizer, &config)?;
    // The mock never predicts EOS, so every sample runs to the limit.
    assert!(sequences.iter().all(|tokens| tokens.len() == 7));
    Ok(())
}

#[test]
fn invalid_parameters_are_rejected() {
    let model = MockModel::new(Behaviour::Words);
    let tokenizer = word_tokenizer();

    let cases = [
        (
            textgen::GenerationConfig {
                top_p: 0.0,
                ..scenario_config()
            },
            InvalidParameter::TopPOutOfRange(0.0),
        ),
        (
            textgen::GenerationConfig {
                num_return_sequences: 0,
                ..scenario_config()
            },
            InvalidParameter::ZeroReturnSequences,
        ),
        (
            textgen::GenerationConfig {
                repetition_penalty: 0.5,
                ..scenario_config()
            },
            InvalidParameter::RepetitionPenaltyBelowOne(0.5),
        ),
        (
            textgen::GenerationConfig {
                temperature: 0.0,
                ..scenario_config()
            },
            InvalidParameter::NonPositiveTemperature(0.0),
        ),
    ];

    for (config, expected) in cases {
        match generate_text("Once upon a time", &model, &tokenizer, &config) {
            Err(GenerationError::InvalidParameter(e)) => assert_eq!(e, expected),
            other => panic!("expected {expected:?}, got {other:?}"),
        }
    }
}

#[test]
fn prompt_filling_max_length_is_rejected() {
    let model = MockModel::new(Behaviour::Words);
    let tokenizer = word_tokenizer();
    let config = textgen::GenerationConfig {
        max_length: 4,
        ..scenario_config()
    };

    let result = generate_text("Once upon a time", &model, &tokenizer, &config);
    assert!(matches!(
        result,
        Err(GenerationError::PromptTooLong {
            prompt_tokens: 4,
            max_length: 4
        })
    ));
}

#[test]
fn max_length_beyond_the_context_window_is_rejected() {
    let model = MockModel::new(Behaviour::Words);
    let tokenizer = word_tokenizer();
    let config = textgen::GenerationConfig {
        max_length: 65,
        ..scenario_config()
    };

    let result = generate_text("Once", &model, &tokenizer, &config);
    assert!(matches!(
        result,
        Err(GenerationError::ContextOverflow {
            requested: 65,
            limit: 64
        })
    ));
}

#[test]
fn tiny_gpt2_generates_through_the_pipeline() -> anyhow::Result<()> {
    let config: Config = serde_json::from_str(
        r#"{
            "vocab_size": 14,
            "n_positions": 32,
            "n_embd": 8,
            "n_layer": 2,
            "n_head": 2,
            "bos_token_id": 0,
            "eos_token_id": 0
        }"#,
    )?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = Gpt2Model::load(vb, &config)?;

    let pipeline = TextGenerationPipeline::new(model, word_tokenizer());
    let generation = textgen::GenerationConfig {
        max_length: 16,
        ..scenario_config()
    };

    let sequences = generate_tokens(
        "Once upon a time",
        pipeline.model(),
        pipeline.tokenizer(),
        &generation,
    )?;
    assert_eq!(sequences.len(), 3);
    assert!(sequences.iter().all(|tokens| tokens.len() <= 16));

    let texts = pipeline.completion("Once upon a time", &generation)?;
    assert_eq!(texts.len(), 3);
    for text in &texts {
        assert!(text.starts_with("Once upon a time"));
        assert!(!text.contains("<|endoftext|>"));
    }
    Ok(())
}
