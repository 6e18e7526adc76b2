use anyhow::{Context, Result};
use derive_more::{Display, From, Into, IntoIterator};
use ndarray::prelude::*;
use rust_bert::pipelines::sentence_embeddings;
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};
use tch::Device;

/// The loaded sentence-embeddings model, held behind an explicit
/// handle: built once per analysis run, reused for every encode call,
/// dropped at process exit. Loading is the only fatal setup step of
/// the pipeline and is never retried.
pub struct RuleEncoder {
    model: sentence_embeddings::SentenceEmbeddingsModel,
}

impl RuleEncoder {
    /// Load the pretrained model onto the given [`Device`].
    /// - [`device`] the device to run inference on.
    /// - [`model_type`] the model to fetch. Note that this is a mirror
    ///   of the [`rust_bert::pipelines::sentence_embeddings`] model
    ///   type, instead of the real thing, because as a foreign enum
    ///   the latter doesn't play nicely with the type system.
    pub fn new(device: Device, model_type: SentenceEmbeddingsModelType) -> Result<Self> {
        let model = sentence_embeddings::SentenceEmbeddingsBuilder::remote(model_type.into())
            .with_device(device)
            .create_model()
            .with_context(|| "RuleEncoder::new()")?;
        Ok(Self { model })
    }

    /// Encode a batch of canonical texts. Row `i` of the result
    /// corresponds to input `i`; every row is scaled to unit length so
    /// downstream cosine similarity is a plain dot product.
    pub fn encode<S>(&self, texts: &[S]) -> Result<Embeddings>
    where
        S: AsRef<str> + Send + Sync,
    {
        if texts.is_empty() {
            return Ok(Embeddings::default());
        }
        let raw = self
            .model
            .encode(texts)
            .with_context(|| "RuleEncoder::encode()")?;
        Ok(Embeddings::from(raw).into_unit_rows())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, From, Into, Display)]
#[display("{{ rows:{} columns:{} }}", self.0.0, self.0.1)]
struct Shape((usize, usize));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, From, Into, IntoIterator)]
struct FlattenedEmbeddings(Vec<f32>);

/// Newtype wrapper around the embedding matrix.
/// Wraps a [`Vec<Vec<f32>>`] for type safety, and associates various
/// utility methods. Row `i` is the vector for rule `i`.
#[derive(Debug, Clone, Default, From, Serialize, Deserialize, IntoIterator, PartialEq)]
#[serde(transparent)]
pub struct Embeddings(Vec<Vec<f32>>);

impl Embeddings {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The model-determined vector dimension (0 when empty).
    pub fn dim(&self) -> usize {
        self.0.first().map_or(0, |row| row.len())
    }

    fn shape(&self) -> Shape {
        (self.len(), self.dim()).into()
    }

    /// Flatten the wrapped [`Vec<Vec<f32>>`] into a [`Vec<f32>`] by
    /// concatenating the rows.
    fn as_flattened_vec(&self) -> FlattenedEmbeddings {
        self.0
            .iter()
            .flat_map(|e| e.to_owned())
            .collect::<Vec<f32>>()
            .into()
    }

    /// Convert this Embeddings into an Array2 for the similarity,
    /// clustering and projection stages.
    pub fn as_ndarray(&self) -> Result<Array2<f32>> {
        let shape = self.shape();
        Array2::from_shape_vec(shape.0, self.as_flattened_vec().into())
            .with_context(|| format!("Embeddings::as_ndarray, shape: {}", shape))
    }

    /// Scale each row to unit L2 norm. Zero rows are left alone; they
    /// carry no direction to preserve.
    pub fn into_unit_rows(self) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|mut row| {
                    let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
                    if norm > 0.0 {
                        for x in row.iter_mut() {
                            *x /= norm;
                        }
                    }
                    row
                })
                .collect(),
        )
    }
}

/// Native enum that maps to a [`SentenceEmbeddingsModelType`].
/// This mirrors the foreign type so it can receive derived traits
/// (notably [`clap::ValueEnum`]) which the foreign type cannot.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    Default,
    IntoStaticStr,
    EnumString,
    Display,
)]
pub enum SentenceEmbeddingsModelType {
    DistiluseBaseMultilingualCased,
    BertBaseNliMeanTokens,
    AllMiniLmL12V2,
    #[default]
    AllMiniLmL6V2,
    AllDistilrobertaV1,
    ParaphraseAlbertSmallV2,
    SentenceT5Base,
}

impl From<SentenceEmbeddingsModelType> for sentence_embeddings::SentenceEmbeddingsModelType {
    fn from(val: SentenceEmbeddingsModelType) -> Self {
        match val {
            SentenceEmbeddingsModelType::DistiluseBaseMultilingualCased => {
                sentence_embeddings::SentenceEmbeddingsModelType::DistiluseBaseMultilingualCased
            }
            SentenceEmbeddingsModelType::BertBaseNliMeanTokens => {
                sentence_embeddings::SentenceEmbeddingsModelType::BertBaseNliMeanTokens
            }
            SentenceEmbeddingsModelType::AllMiniLmL12V2 => {
                sentence_embeddings::SentenceEmbeddingsModelType::AllMiniLmL12V2
            }
            SentenceEmbeddingsModelType::AllMiniLmL6V2 => {
                sentence_embeddings::SentenceEmbeddingsModelType::AllMiniLmL6V2
            }
            SentenceEmbeddingsModelType::AllDistilrobertaV1 => {
                sentence_embeddings::SentenceEmbeddingsModelType::AllDistilrobertaV1
            }
            SentenceEmbeddingsModelType::ParaphraseAlbertSmallV2 => {
                sentence_embeddings::SentenceEmbeddingsModelType::ParaphraseAlbertSmallV2
            }
            SentenceEmbeddingsModelType::SentenceT5Base => {
                sentence_embeddings::SentenceEmbeddingsModelType::SentenceT5Base
            }
        }
    }
}
