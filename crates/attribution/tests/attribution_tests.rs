use attention::{AttentionConfig, AttributableMultiHeadAttention};
use attribution::{
    to_dot, token_attribution, AttributionConfig, AttributionStore, IntegratedGradients, Vertex,
};
use std::collections::BTreeSet;

use candle_core::{DType, Device, Tensor};
use model::{TransformerConfig, TransformerStack};

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn tiny_stack() -> anyhow::Result<TransformerStack<AttributableMultiHeadAttention>> {
    let mut config = TransformerConfig::new(8, 2, 16, 3);
    config.dropout_p = 0.0;
    let attention = AttentionConfig::new(8, 2);
    Ok(TransformerStack::new(
        &config,
        |_| {
            AttributableMultiHeadAttention::new(&attention, &Device::Cpu, DType::F32)
                .map_err(|e| candle_core::Error::Msg(e.to_string()))
        },
        &Device::Cpu,
        DType::F32,
    )?)
}

#[test]
fn collected_attributions_build_a_rendered_tree() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("attributions.db");
    let model = tiny_stack()?;
    let config = AttributionConfig {
        integration_steps: 3,
        tau: 0.4,
    };
    let ig = IntegratedGradients::from_config(&config)?;

    // Row 0 of every example stands in for the class token.
    let examples = vec![
        (names(&["alpha", "beta", "gamma"]), Tensor::randn(0f32, 1.0, (4, 8), &Device::Cpu)?),
        (names(&["beta", "delta", "alpha"]), Tensor::randn(0f32, 1.0, (4, 8), &Device::Cpu)?),
    ];
    let mut store = AttributionStore::create(&path)?;
    assert_eq!(ig.collect(&model, examples, &mut store)?, 2);
    assert_eq!(store.finish()?, 2);

    let store = AttributionStore::open(&path)?;
    assert_eq!(store.len()?, 2);
    let record = store.record(1)?;
    assert_eq!(record.shape, vec![3, 2, 4, 4]);
    assert_eq!(record.metadata, names(&["beta", "delta", "alpha"]));
    assert_eq!(store.input(0, &Device::Cpu)?.dims(), &[4, 8]);

    let graph = token_attribution(&store, config.tau)?;
    graph.check_tree()?;
    assert_eq!(graph.token_attrs.len(), 4);
    assert_eq!(graph.label(Vertex::Class), "[CLS]");
    assert_eq!(graph.parent(Vertex::Token(graph.root)), Some(Vertex::Class));

    let dot = to_dot(&graph);
    let root_label = graph.label(Vertex::Token(graph.root));
    assert!(dot.contains(&format!("\"{root_label}\" -> \"[CLS]\";")));
    Ok(())
}

#[test]
fn empty_store_has_no_tree() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("empty.db");
    AttributionStore::create(&path)?.finish()?;
    let store = AttributionStore::open(&path)?;
    assert!(store.is_empty()?);
    assert!(token_attribution(&store, 0.4).is_err());
    Ok(())
}

/// `(layers, heads, 4, 4)` scores for three tokens behind a class row/column.
/// `token[l][h][i][j]` fills entry `(i + 1, j + 1)`; the class entries carry
/// large values that must be ignored.
fn with_class_token(token: &[[[[f32; 3]; 3]; 2]; 2]) -> anyhow::Result<Tensor> {
    let mut data = Vec::with_capacity(2 * 2 * 16);
    for layer in token {
        for head in layer {
            for q in 0..4 {
                for k in 0..4 {
                    data.push(if q == 0 || k == 0 { 50.0 } else { head[q - 1][k - 1] });
                }
            }
        }
    }
    Ok(Tensor::from_vec(data, (2, 2, 4, 4), &Device::Cpu)?)
}

#[test]
fn hand_built_attributions_give_the_expected_tree() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("synthetic.db");
    let zero = [[0.0f32; 3]; 3];

    // Layer 0 (walked, tau 0.4): a->b sums to 1.0 over the heads, b->c is 0.5,
    // a->c is 0.1 and falls under the threshold.
    // Layer 1 (last, tau 0): a->b 0.2 and c->a 0.3 only add to the totals.
    let first = with_class_token(&[
        [
            [[0.0, 0.6, 0.1], [0.0, 0.0, 0.5], [0.0, 0.0, 0.0]],
            [[0.0, 0.4, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
        ],
        [
            [[0.0, 0.2, 0.0], [0.0, 0.0, 0.0], [0.3, 0.0, 0.0]],
            zero,
        ],
    ])?;
    // The second record names the same tokens in another order and has no
    // positive attribution, so it adds nothing to edges or totals.
    let second = with_class_token(&[[zero, zero], [zero, zero]])?;

    let x = Tensor::zeros((4, 8), DType::F32, &Device::Cpu)?;
    let mut store = AttributionStore::create(&path)?;
    store.append(&x, &names(&["a", "b", "c"]), &first)?;
    store.append(&x, &names(&["c", "a", "b"]), &second)?;
    store.finish()?;

    let store = AttributionStore::open(&path)?;
    let graph = token_attribution(&store, 0.4)?;
    graph.check_tree()?;

    let expected = [1.3, 0.5, 0.3];
    assert_eq!(graph.token_attrs.len(), 3);
    for (total, want) in graph.token_attrs.iter().zip(expected) {
        assert!((total - want).abs() < 1e-6, "{:?}", graph.token_attrs);
    }
    assert_eq!(graph.root, 0);
    assert_eq!(graph.label(Vertex::Token(0)), "a");

    let edges = graph
        .edges
        .iter()
        .map(|&(parent, child)| (graph.label(parent).to_string(), graph.label(child).to_string()))
        .collect::<BTreeSet<_>>();
    let expected = [("[CLS]", "a"), ("a", "b"), ("b", "c")]
        .iter()
        .map(|&(p, c)| (p.to_string(), c.to_string()))
        .collect::<BTreeSet<_>>();
    assert_eq!(edges, expected);
    assert_eq!(graph.vertices.len(), 4);
    Ok(())
}
