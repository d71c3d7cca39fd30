mod common;

use anyhow::Result;
use common::{recorded_model, small_config, small_shape};
use kvforge::orchestrator::{
    CausalMaskBuilder, DecodeOrchestrator, GenerationConfig, OrchestratorError, Phase,
    PositionSequencer, StepOutcome,
};
use proptest::prelude::*;
use std::sync::Arc;

#[test]
fn trunk_positions_are_gapless_across_phases() -> Result<()> {
    let model = recorded_model(small_shape(4, 32), small_config())?;
    let mut orchestrator = DecodeOrchestrator::new(Arc::new(model))?;
    let prompt: Vec<u32> = (1..=11).collect();
    let config = GenerationConfig::greedy().with_max_new_tokens(6);
    let handle = orchestrator.start_session(&prompt, config)?;

    loop {
        let outcome = orchestrator.advance(&handle)?;
        let cursor = orchestrator.cursor(&handle)?;
        if let StepOutcome::Token(_) = outcome {
            assert_eq!(orchestrator.cache_counter(&handle)?, Some(cursor));
        }
        if let StepOutcome::Finished(_) = outcome {
            break;
        }
    }

    let calls = orchestrator.backend().trunk.calls();
    let seen: Vec<usize> = calls.iter().flat_map(|c| c.positions.clone()).collect();
    let expected: Vec<usize> = (0..seen.len()).collect();
    assert_eq!(seen, expected);

    // three prefill windows (4, 4, 3) then single-token decode steps
    let widths: Vec<usize> = calls.iter().map(|c| c.positions.len()).collect();
    assert_eq!(&widths[..3], &[4, 4, 3]);
    assert!(widths[3..].iter().all(|w| *w == 1));
    Ok(())
}

#[test]
fn decode_masks_use_the_global_position() -> Result<()> {
    let model = recorded_model(small_shape(4, 32), small_config())?;
    let mut orchestrator = DecodeOrchestrator::new(Arc::new(model))?;
    let config = GenerationConfig::greedy().with_max_new_tokens(4);
    orchestrator.generate(&[3, 1, 4, 1, 5, 9], config)?;

    for call in orchestrator.backend().trunk.calls() {
        let (_, _, rows, ctx) = call.mask.dim();
        assert_eq!(ctx, 32);
        for (row, position) in call.positions.iter().enumerate() {
            for col in 0..ctx {
                let allowed = call.mask[[0, 0, row, col]] == 0.0;
                assert_eq!(allowed, col <= *position, "row {row} col {col}");
            }
        }
        assert!(rows >= call.positions.len());
    }
    Ok(())
}

#[test]
fn sequencer_rejects_windows_past_the_context() {
    let sequencer = PositionSequencer::new(16);
    assert!(matches!(
        sequencer.sequence(Phase::Decode, 16, 1),
        Err(OrchestratorError::ContextOverflow { start: 16, .. })
    ));
    assert!(sequencer.sequence(Phase::Decode, 15, 1).is_ok());
    assert!(matches!(
        sequencer.sequence(Phase::Decode, 3, 2),
        Err(OrchestratorError::ShapeMismatch { .. })
    ));
}

proptest! {
    #[test]
    fn mask_row_at_position_permits_prefix(ctx in 1usize..96, p_frac in 0.0f64..1.0) {
        let p = ((ctx as f64) * p_frac) as usize;
        let mask = CausalMaskBuilder::new().build(p, 1, ctx).unwrap();
        prop_assert_eq!(mask.dim(), (1, 1, 1, ctx));
        for col in 0..ctx {
            let value = mask[[0, 0, 0, col]];
            if col <= p {
                prop_assert_eq!(value, 0.0);
            } else {
                prop_assert!(value == f32::NEG_INFINITY);
            }
        }
    }

    #[test]
    fn prefill_positions_are_contiguous(start in 0usize..64, len in 1usize..32) {
        let sequencer = PositionSequencer::new(96);
        let positions = sequencer.sequence(Phase::Prefill, start, len).unwrap();
        prop_assert_eq!(positions.to_vec(), (start..start + len).collect::<Vec<_>>());
        prop_assert_eq!(positions.end(), start + len);
    }
}
