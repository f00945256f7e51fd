pub mod chain_normalizer;
