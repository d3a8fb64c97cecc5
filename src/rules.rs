//! Conditional requirement rules.
//!
//! Rules are a pure function of the current values: they yield the full
//! metadata of every dependent field, so evaluating them twice in a row
//! changes nothing the second time.
use std::collections::BTreeMap;

use crate::config::OccupationConfig;
use crate::field::FieldValue;
use crate::schema::{AddressKind, FormSchema, names};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Meta {
        field: &'static str,
        required: bool,
        readonly: bool,
        visible: bool,
    },
    Clear(&'static str),
    /// Copy the value of `from` into `to`.
    Mirror {
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupationClass {
    NoIncome,
    Other,
    /// Anything else, including no selection yet.
    Earning,
}

const INCOME_FIELDS: [&str; 3] = [names::ANNUAL_INCOME, names::INCOME_MODE, names::INCOME_SOURCE];

#[derive(Debug, Clone)]
pub struct RuleSet {
    schema: FormSchema,
    no_income: Vec<String>,
    other: String,
    pan_exempt_codes: Vec<String>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(FormSchema::kyc(), &OccupationConfig::default())
    }
}

impl RuleSet {
    pub fn new(schema: FormSchema, cfg: &OccupationConfig) -> Self {
        Self {
            schema,
            no_income: cfg.no_income.clone(),
            other: cfg.other.clone(),
            pan_exempt_codes: cfg.pan_exempt_codes.clone(),
        }
    }

    /// Fields whose change requires the rules to be evaluated again.
    pub fn controls(&self, field: &str) -> bool {
        matches!(
            field,
            names::OCCUPATION | names::MARITAL_STATUS | names::SAME_ADDRESS
        ) || field.starts_with("perm_")
    }

    pub fn classify_occupation(&self, occupation: &str) -> OccupationClass {
        let occupation = occupation.trim();
        if self.no_income.iter().any(|c| c == occupation) {
            OccupationClass::NoIncome
        } else if occupation == self.other {
            OccupationClass::Other
        } else {
            OccupationClass::Earning
        }
    }

    pub fn is_pan_exempt(&self, occupation: &str) -> bool {
        let occupation = occupation.trim();
        self.pan_exempt_codes.iter().any(|c| c == occupation)
    }

    pub fn evaluate(&self, values: &BTreeMap<&'static str, FieldValue>) -> Vec<Effect> {
        let get = |name: &str| values.get(name).map(FieldValue::as_str).unwrap_or_default();
        let mut effects = Vec::new();
        self.occupation_effects(get(names::OCCUPATION), &mut effects);
        self.marital_effects(get(names::MARITAL_STATUS), &mut effects);
        let same = values
            .get(names::SAME_ADDRESS)
            .is_some_and(FieldValue::is_checked);
        self.address_effects(same, &mut effects);
        effects
    }

    fn occupation_effects(&self, occupation: &str, out: &mut Vec<Effect>) {
        let meta = |field, required, readonly, visible| Effect::Meta {
            field,
            required,
            readonly,
            visible,
        };
        match self.classify_occupation(occupation) {
            OccupationClass::NoIncome => {
                for field in INCOME_FIELDS.into_iter().chain([names::PAN_NUMBER]) {
                    out.push(meta(field, false, true, true));
                    out.push(Effect::Clear(field));
                }
                out.push(meta(names::OCCUPATION_DESCRIPTION, false, false, false));
            }
            OccupationClass::Other => {
                out.push(meta(names::OCCUPATION_DESCRIPTION, true, false, true));
                for field in INCOME_FIELDS {
                    out.push(meta(field, true, false, true));
                }
                out.push(meta(names::PAN_NUMBER, false, false, true));
            }
            OccupationClass::Earning => {
                out.push(meta(names::OCCUPATION_DESCRIPTION, false, false, false));
                for field in INCOME_FIELDS {
                    out.push(meta(field, true, false, true));
                }
                let pan_required = !self.is_pan_exempt(occupation);
                out.push(meta(names::PAN_NUMBER, pan_required, false, true));
            }
        }
    }

    fn marital_effects(&self, status: &str, out: &mut Vec<Effect>) {
        if status.trim().eq_ignore_ascii_case("married") {
            out.push(Effect::Meta {
                field: names::SPOUSE_NAME,
                required: true,
                readonly: false,
                visible: true,
            });
        } else {
            out.push(Effect::Meta {
                field: names::SPOUSE_NAME,
                required: false,
                readonly: true,
                visible: true,
            });
            out.push(Effect::Clear(names::SPOUSE_NAME));
        }
    }

    fn address_effects(&self, same: bool, out: &mut Vec<Effect>) {
        let perm = AddressKind::Permanent;
        let temp = AddressKind::Temporary;
        let pairs = perm
            .cascade()
            .into_iter()
            .chain(perm.details())
            .zip(temp.cascade().into_iter().chain(temp.details()));
        for (from, to) in pairs {
            let required = self.schema.field(to).is_some_and(|f| f.required);
            if same {
                out.push(Effect::Mirror { from, to });
            }
            out.push(Effect::Meta {
                field: to,
                required,
                readonly: same,
                visible: true,
            });
        }
    }
}
