//! DataIndices - Name/position bookkeeping between dataset and model
//!
//! Variables fall into three roles:
//! - forcing: known inputs (e.g. insolation), never predicted
//! - diagnostic: predicted only, never fed back as input (e.g. precipitation)
//! - prognostic: everything else, both input and output
//!
//! `data` positions index the dataset's variable axis, `model` positions
//! index the model's input or output vectors.

use std::collections::BTreeMap;

use candle_core::{bail, Device, Result, Tensor};

/// Positions for one side (input or output) of one space (data or model).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexSet {
    pub full: Vec<u32>,
    pub prognostic: Vec<u32>,
    pub forcing: Vec<u32>,
    pub diagnostic: Vec<u32>,
    pub name_to_index: BTreeMap<String, usize>,
}

impl IndexSet {
    pub fn len(&self) -> usize {
        self.full.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty()
    }

    /// Names ordered by position.
    pub fn names(&self) -> Vec<String> {
        let mut pairs: Vec<(&String, &usize)> = self.name_to_index.iter().collect();
        pairs.sort_by_key(|(_, idx)| **idx);
        pairs.into_iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn full_ids(&self, device: &Device) -> Result<Tensor> {
        Tensor::new(self.full.as_slice(), device)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputOutput {
    pub input: IndexSet,
    pub output: IndexSet,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataIndices {
    variables: Vec<String>,
    forcing: Vec<String>,
    diagnostic: Vec<String>,
    pub data: InputOutput,
    pub model: InputOutput,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Prognostic,
    Forcing,
    Diagnostic,
}

impl DataIndices {
    pub fn new(variables: &[String], forcing: &[String], diagnostic: &[String]) -> Result<Self> {
        for name in forcing.iter().chain(diagnostic) {
            if !variables.contains(name) {
                bail!("variable '{name}' is not part of the dataset");
            }
        }
        if let Some(name) = forcing.iter().find(|n| diagnostic.contains(n)) {
            bail!("variable '{name}' cannot be both forcing and diagnostic");
        }

        let role = |name: &String| {
            if forcing.contains(name) {
                Role::Forcing
            } else if diagnostic.contains(name) {
                Role::Diagnostic
            } else {
                Role::Prognostic
            }
        };

        let mut data = InputOutput::default();
        let mut model = InputOutput::default();

        for (pos, name) in variables.iter().enumerate() {
            let pos = pos as u32;
            let role = role(name);

            if role != Role::Diagnostic {
                let model_pos = model.input.full.len() as u32;
                data.input.full.push(pos);
                model.input.full.push(model_pos);
                model.input.name_to_index.insert(name.clone(), model_pos as usize);
                data.input.name_to_index.insert(name.clone(), pos as usize);
                match role {
                    Role::Forcing => {
                        data.input.forcing.push(pos);
                        model.input.forcing.push(model_pos);
                    }
                    _ => {
                        data.input.prognostic.push(pos);
                        model.input.prognostic.push(model_pos);
                    }
                }
            }

            if role != Role::Forcing {
                let model_pos = model.output.full.len() as u32;
                data.output.full.push(pos);
                model.output.full.push(model_pos);
                model.output.name_to_index.insert(name.clone(), model_pos as usize);
                data.output.name_to_index.insert(name.clone(), pos as usize);
                match role {
                    Role::Diagnostic => {
                        data.output.diagnostic.push(pos);
                        model.output.diagnostic.push(model_pos);
                    }
                    _ => {
                        data.output.prognostic.push(pos);
                        model.output.prognostic.push(model_pos);
                    }
                }
            }
        }

        Ok(Self {
            variables: variables.to_vec(),
            forcing: forcing.to_vec(),
            diagnostic: diagnostic.to_vec(),
            data,
            model,
        })
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn is_diagnostic(&self, name: &str) -> bool {
        self.diagnostic.iter().any(|d| d == name)
    }

    pub fn is_forcing(&self, name: &str) -> bool {
        self.forcing.iter().any(|f| f == name)
    }

    /// Position of `name` in the model output.
    pub fn output_index(&self, name: &str) -> Result<usize> {
        match self.model.output.name_to_index.get(name) {
            Some(idx) => Ok(*idx),
            None => bail!("'{name}' is not a model output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_roles_split_input_and_output() -> anyhow::Result<()> {
        let vars = names(&["z_500", "cos_lat", "t_850", "tp"]);
        let indices = DataIndices::new(&vars, &names(&["cos_lat"]), &names(&["tp"]))?;

        assert_eq!(indices.data.input.full, vec![0, 1, 2]);
        assert_eq!(indices.data.input.forcing, vec![1]);
        assert_eq!(indices.data.output.full, vec![0, 2, 3]);

        assert_eq!(indices.model.input.prognostic, vec![0, 2]);
        assert_eq!(indices.model.input.forcing, vec![1]);
        assert_eq!(indices.model.output.prognostic, vec![0, 1]);
        assert_eq!(indices.model.output.diagnostic, vec![2]);

        assert_eq!(indices.output_index("tp")?, 2);
        assert!(indices.output_index("cos_lat").is_err());
        assert_eq!(indices.model.output.names(), names(&["z_500", "t_850", "tp"]));
        Ok(())
    }

    #[test]
    fn test_unknown_role_names_rejected() {
        let vars = names(&["a", "b"]);
        assert!(DataIndices::new(&vars, &names(&["c"]), &[]).is_err());
        assert!(DataIndices::new(&vars, &names(&["a"]), &names(&["a"])).is_err());
    }
}
