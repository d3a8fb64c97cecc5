//! The KYC form layout: which fields exist, what they hold and where they live.
use crate::calendar::Calendar;
use crate::documents::DocumentSlot;

/// Field keys as they appear in saved progress.
pub mod names {
    pub const SALUTATION: &str = "salutation";
    pub const FIRST_NAME: &str = "first_name";
    pub const MIDDLE_NAME: &str = "middle_name";
    pub const LAST_NAME: &str = "last_name";
    pub const FULL_NAME_NEP: &str = "full_name_nep";
    pub const GENDER: &str = "gender";
    pub const MARITAL_STATUS: &str = "marital_status";
    pub const SPOUSE_NAME: &str = "spouse_name";
    pub const NATIONALITY: &str = "nationality";
    pub const DOB_BS: &str = "dob_bs";
    pub const DOB_AD: &str = "dob_ad";
    pub const FATHER_NAME: &str = "father_name";
    pub const MOTHER_NAME: &str = "mother_name";
    pub const GRAND_FATHER_NAME: &str = "grand_father_name";
    pub const FATHER_IN_LAW_NAME: &str = "father_in_law_name";
    pub const CITIZENSHIP_NO: &str = "citizenship_no";
    pub const CITIZEN_BS: &str = "citizen_bs";
    pub const CITIZEN_AD: &str = "citizen_ad";
    pub const CITIZENSHIP_ISSUED_PLACE: &str = "citizenship_issued_place";
    pub const PASSPORT_NO: &str = "passport_no";
    pub const NID_NO: &str = "nid_no";

    pub const OCCUPATION: &str = "occupation";
    pub const OCCUPATION_DESCRIPTION: &str = "occupation_description";
    pub const INCOME_MODE: &str = "income_mode";
    pub const ANNUAL_INCOME: &str = "annual_income";
    pub const INCOME_SOURCE: &str = "income_source";
    pub const PAN_NUMBER: &str = "pan_number";
    pub const QUALIFICATION: &str = "qualification";
    pub const EMPLOYER_NAME: &str = "employer_name";
    pub const OFFICE_ADDRESS: &str = "office_address";
    pub const BANK_NAME: &str = "bank_name";
    pub const BRANCH_NAME: &str = "branch_name";
    pub const BANK_ACCOUNT_NUMBER: &str = "bank_account_number";
    pub const ACCOUNT_TYPE: &str = "account_type";

    pub const PERM_PROVINCE: &str = "perm_province";
    pub const PERM_DISTRICT: &str = "perm_district";
    pub const PERM_MUNICIPALITY: &str = "perm_municipality";
    pub const PERM_WARD: &str = "perm_ward";
    pub const PERM_ADDRESS: &str = "perm_address";
    pub const PERM_HOUSE_NUMBER: &str = "perm_house_number";
    pub const SAME_ADDRESS: &str = "same_address";
    pub const TEMP_PROVINCE: &str = "temp_province";
    pub const TEMP_DISTRICT: &str = "temp_district";
    pub const TEMP_MUNICIPALITY: &str = "temp_municipality";
    pub const TEMP_WARD: &str = "temp_ward";
    pub const TEMP_ADDRESS: &str = "temp_address";
    pub const TEMP_HOUSE_NUMBER: &str = "temp_house_number";

    pub const NOMINEE_NAME: &str = "nominee_name";
    pub const NOMINEE_RELATION: &str = "nominee_relation";
    pub const NOMINEE_DOB_BS: &str = "nominee_dob_bs";
    pub const NOMINEE_DOB_AD: &str = "nominee_dob_ad";
    pub const NOMINEE_CONTACT: &str = "nominee_contact";
    pub const GUARDIAN_NAME: &str = "guardian_name";
    pub const GUARDIAN_RELATION: &str = "guardian_relation";

    pub const EMAIL: &str = "email";
    pub const MOBILE: &str = "mobile";
    pub const CONTACT_MOBILE: &str = "contact_mobile";
    pub const PHOTO: &str = "photo";
    pub const CITIZENSHIP_FRONT: &str = "citizenship_front";
    pub const CITIZENSHIP_BACK: &str = "citizenship_back";
    pub const SIGNATURE: &str = "signature";
    pub const NID: &str = "nid";
    pub const PASSPORT_DOC: &str = "passport_doc";
    pub const IS_PEP: &str = "is_pep";
    pub const IS_AML: &str = "is_aml";
    pub const DECLARATION: &str = "declaration";
}

pub const SALUTATIONS: &[&str] = &["Mr.", "Mrs.", "Ms.", "Miss"];
pub const NATIONALITIES: &[&str] = &["Nepali", "Indian", "Other"];
pub const GENDERS: &[&str] = &["Male", "Female", "Other"];
pub const MARITAL_STATUSES: &[&str] = &["Single", "Married", "Divorced", "Widowed"];
pub const YES_NO: &[&str] = &["yes", "no"];
pub const INCOME_MODES: &[&str] = &["Monthly", "Annually"];
pub const QUALIFICATIONS: &[&str] = &[
    "Under SLC",
    "SLC/SEE",
    "Intermediate",
    "Bachelor",
    "Master",
    "PhD",
];
pub const ACCOUNT_TYPES: &[&str] = &["Saving", "Current", "Fixed"];
pub const RELATIONS: &[&str] = &[
    "Father", "Mother", "Spouse", "Son", "Daughter", "Brother", "Sister", "Other",
];

/// Content check applied to non-empty text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    Free,
    Email,
    /// At least ten digits.
    ContactNumber,
    Digits,
    /// Devanagari letters and whitespace only.
    Devanagari,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressKind {
    Permanent,
    Temporary,
}

impl AddressKind {
    pub fn prefix(self) -> &'static str {
        match self {
            AddressKind::Permanent => "perm",
            AddressKind::Temporary => "temp",
        }
    }

    /// Province, district and municipality field names, parent first.
    pub fn cascade(self) -> [&'static str; 3] {
        match self {
            AddressKind::Permanent => [
                names::PERM_PROVINCE,
                names::PERM_DISTRICT,
                names::PERM_MUNICIPALITY,
            ],
            AddressKind::Temporary => [
                names::TEMP_PROVINCE,
                names::TEMP_DISTRICT,
                names::TEMP_MUNICIPALITY,
            ],
        }
    }

    /// Ward, street address and house number.
    pub fn details(self) -> [&'static str; 3] {
        match self {
            AddressKind::Permanent => [
                names::PERM_WARD,
                names::PERM_ADDRESS,
                names::PERM_HOUSE_NUMBER,
            ],
            AddressKind::Temporary => [
                names::TEMP_WARD,
                names::TEMP_ADDRESS,
                names::TEMP_HOUSE_NUMBER,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CascadeLevel {
    Province,
    District,
    Municipality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectSource {
    Static(&'static [&'static str]),
    Banks,
    Occupations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text(FieldFormat),
    Select(SelectSource),
    Cascade(AddressKind, CascadeLevel),
    Radio(&'static [&'static str]),
    Checkbox,
    Date(Calendar),
    /// The OTP-verified mobile number.
    Mobile,
    File(DocumentSlot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub step: u8,
    pub kind: FieldKind,
    pub required: bool,
}

const fn field(
    name: &'static str,
    label: &'static str,
    step: u8,
    kind: FieldKind,
    required: bool,
) -> FieldSpec {
    FieldSpec {
        name,
        label,
        step,
        kind,
        required,
    }
}

const TEXT: FieldKind = FieldKind::Text(FieldFormat::Free);

use names::*;

#[rustfmt::skip]
static KYC_FIELDS: &[FieldSpec] = &[
    field(SALUTATION, "Salutation", 1, FieldKind::Select(SelectSource::Static(SALUTATIONS)), true),
    field(FIRST_NAME, "First Name", 1, TEXT, true),
    field(MIDDLE_NAME, "Middle Name", 1, TEXT, false),
    field(LAST_NAME, "Last Name", 1, TEXT, true),
    field(FULL_NAME_NEP, "Full Name (Nepali)", 1, FieldKind::Text(FieldFormat::Devanagari), false),
    field(GENDER, "Gender", 1, FieldKind::Radio(GENDERS), true),
    field(MARITAL_STATUS, "Marital Status", 1, FieldKind::Radio(MARITAL_STATUSES), true),
    field(SPOUSE_NAME, "Spouse Name", 1, TEXT, false),
    field(NATIONALITY, "Nationality", 1, FieldKind::Select(SelectSource::Static(NATIONALITIES)), true),
    field(DOB_BS, "Date of Birth (BS)", 1, FieldKind::Date(Calendar::Bs), true),
    field(DOB_AD, "Date of Birth (AD)", 1, FieldKind::Date(Calendar::Ad), true),
    field(FATHER_NAME, "Father's Name", 1, TEXT, true),
    field(MOTHER_NAME, "Mother's Name", 1, TEXT, true),
    field(GRAND_FATHER_NAME, "Grandfather's Name", 1, TEXT, true),
    field(FATHER_IN_LAW_NAME, "Father-in-law's Name", 1, TEXT, false),
    field(CITIZENSHIP_NO, "Citizenship Number", 1, TEXT, true),
    field(CITIZEN_BS, "Citizenship Issue Date (BS)", 1, FieldKind::Date(Calendar::Bs), true),
    field(CITIZEN_AD, "Citizenship Issue Date (AD)", 1, FieldKind::Date(Calendar::Ad), true),
    field(CITIZENSHIP_ISSUED_PLACE, "Citizenship Issued Place", 1, TEXT, true),
    field(PASSPORT_NO, "Passport Number", 1, TEXT, false),
    field(NID_NO, "National ID Number", 1, TEXT, false),

    field(OCCUPATION, "Occupation", 2, FieldKind::Select(SelectSource::Occupations), true),
    field(OCCUPATION_DESCRIPTION, "Occupation Description", 2, TEXT, false),
    field(INCOME_MODE, "Income Mode", 2, FieldKind::Select(SelectSource::Static(INCOME_MODES)), true),
    field(ANNUAL_INCOME, "Annual Income", 2, FieldKind::Text(FieldFormat::Digits), true),
    field(INCOME_SOURCE, "Income Source", 2, TEXT, true),
    field(PAN_NUMBER, "PAN Number", 2, TEXT, true),
    field(QUALIFICATION, "Qualification", 2, FieldKind::Select(SelectSource::Static(QUALIFICATIONS)), true),
    field(EMPLOYER_NAME, "Employer Name", 2, TEXT, false),
    field(OFFICE_ADDRESS, "Office Address", 2, TEXT, false),
    field(BANK_NAME, "Bank Name", 2, FieldKind::Select(SelectSource::Banks), true),
    field(BRANCH_NAME, "Branch Name", 2, TEXT, true),
    field(BANK_ACCOUNT_NUMBER, "Account Number", 2, TEXT, true),
    field(ACCOUNT_TYPE, "Account Type", 2, FieldKind::Select(SelectSource::Static(ACCOUNT_TYPES)), true),

    field(PERM_PROVINCE, "Permanent Province", 3, FieldKind::Cascade(AddressKind::Permanent, CascadeLevel::Province), true),
    field(PERM_DISTRICT, "Permanent District", 3, FieldKind::Cascade(AddressKind::Permanent, CascadeLevel::District), true),
    field(PERM_MUNICIPALITY, "Permanent Municipality", 3, FieldKind::Cascade(AddressKind::Permanent, CascadeLevel::Municipality), true),
    field(PERM_WARD, "Permanent Ward No.", 3, FieldKind::Text(FieldFormat::Digits), true),
    field(PERM_ADDRESS, "Permanent Address", 3, TEXT, true),
    field(PERM_HOUSE_NUMBER, "Permanent House Number", 3, TEXT, false),
    field(SAME_ADDRESS, "Same as Permanent Address", 3, FieldKind::Checkbox, false),
    field(TEMP_PROVINCE, "Temporary Province", 3, FieldKind::Cascade(AddressKind::Temporary, CascadeLevel::Province), true),
    field(TEMP_DISTRICT, "Temporary District", 3, FieldKind::Cascade(AddressKind::Temporary, CascadeLevel::District), true),
    field(TEMP_MUNICIPALITY, "Temporary Municipality", 3, FieldKind::Cascade(AddressKind::Temporary, CascadeLevel::Municipality), true),
    field(TEMP_WARD, "Temporary Ward No.", 3, FieldKind::Text(FieldFormat::Digits), true),
    field(TEMP_ADDRESS, "Temporary Address", 3, TEXT, true),
    field(TEMP_HOUSE_NUMBER, "Temporary House Number", 3, TEXT, false),

    field(NOMINEE_NAME, "Nominee Name", 4, TEXT, true),
    field(NOMINEE_RELATION, "Nominee Relation", 4, FieldKind::Select(SelectSource::Static(RELATIONS)), true),
    field(NOMINEE_DOB_BS, "Nominee Date of Birth (BS)", 4, FieldKind::Date(Calendar::Bs), true),
    field(NOMINEE_DOB_AD, "Nominee Date of Birth (AD)", 4, FieldKind::Date(Calendar::Ad), true),
    field(NOMINEE_CONTACT, "Nominee Contact", 4, FieldKind::Text(FieldFormat::ContactNumber), true),
    field(GUARDIAN_NAME, "Guardian Name", 4, TEXT, false),
    field(GUARDIAN_RELATION, "Guardian Relation", 4, TEXT, false),

    field(EMAIL, "Email", 5, FieldKind::Text(FieldFormat::Email), true),
    field(MOBILE, "Mobile Number", 5, FieldKind::Mobile, true),
    field(CONTACT_MOBILE, "Alternate Contact Number", 5, FieldKind::Text(FieldFormat::ContactNumber), false),
    field(PHOTO, "Passport Size Photo", 5, FieldKind::File(DocumentSlot::Photo), true),
    field(CITIZENSHIP_FRONT, "Citizenship Front", 5, FieldKind::File(DocumentSlot::CitizenshipFront), true),
    field(CITIZENSHIP_BACK, "Citizenship Back", 5, FieldKind::File(DocumentSlot::CitizenshipBack), true),
    field(SIGNATURE, "Signature", 5, FieldKind::File(DocumentSlot::Signature), true),
    field(NID, "National Identity Card", 5, FieldKind::File(DocumentSlot::Nid), false),
    field(PASSPORT_DOC, "Passport", 5, FieldKind::File(DocumentSlot::Passport), false),
    field(IS_PEP, "Politically Exposed Person", 5, FieldKind::Radio(YES_NO), true),
    field(IS_AML, "AML Declaration", 5, FieldKind::Radio(YES_NO), true),
    field(DECLARATION, "Declaration", 5, FieldKind::Checkbox, true),
];

static STEP_TITLES: &[&str] = &[
    "Personal Details",
    "Occupation & Bank",
    "Address",
    "Nominee",
    "Contact, Documents & Declaration",
];

/// Ordered field layout of the form.
#[derive(Debug, Clone, Copy)]
pub struct FormSchema {
    fields: &'static [FieldSpec],
    titles: &'static [&'static str],
}

impl Default for FormSchema {
    fn default() -> Self {
        Self::kyc()
    }
}

impl FormSchema {
    pub fn kyc() -> Self {
        Self {
            fields: KYC_FIELDS,
            titles: STEP_TITLES,
        }
    }

    pub fn total_steps(&self) -> u8 {
        u8::try_from(self.titles.len()).unwrap_or(u8::MAX)
    }

    pub fn step_title(&self, step: u8) -> Option<&'static str> {
        self.titles.get(usize::from(step).checked_sub(1)?).copied()
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn step_fields(&self, step: u8) -> impl Iterator<Item = &'static FieldSpec> + use<> {
        self.fields.iter().filter(move |f| f.step == step)
    }

    pub fn radio_fields(&self) -> impl Iterator<Item = &'static FieldSpec> + use<> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Radio(_)))
    }
}
