use propsync_db::records::models::ColumnSpec;

/// Remote identifier of every record; stored in the natural-key column.
pub const NATURAL_KEY_FIELD: &str = "Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Client,
    Property,
    Unit,
    UnitOwner,
}

impl EntityKind {
    pub fn descriptor(self) -> &'static EntityDescriptor {
        match self {
            Self::Client => &CLIENTS,
            Self::Property => &PROPERTIES,
            Self::Unit => &UNITS,
            Self::UnitOwner => &UNIT_OWNERS,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.descriptor().remote_object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Checkbox-like; absent means `false`, never null.
    Bool,
    Integer,
    Decimal,
    Date,
    DateTime,
    /// Remote id of a parent record, translated to the parent's local id before write.
    Reference(EntityKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub remote: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    pub mutable: bool,
}

impl FieldSpec {
    const fn new(remote: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self {
            remote,
            column,
            kind,
            mutable: true,
        }
    }

    const fn immutable(self) -> Self {
        Self {
            mutable: false,
            ..self
        }
    }
}

const fn text(remote: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec::new(remote, column, FieldKind::Text)
}

const fn flag(remote: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec::new(remote, column, FieldKind::Bool)
}

const fn integer(remote: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec::new(remote, column, FieldKind::Integer)
}

const fn decimal(remote: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec::new(remote, column, FieldKind::Decimal)
}

const fn date(remote: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec::new(remote, column, FieldKind::Date)
}

const fn timestamp(remote: &'static str, column: &'static str) -> FieldSpec {
    FieldSpec::new(remote, column, FieldKind::DateTime)
}

const fn reference(remote: &'static str, column: &'static str, parent: EntityKind) -> FieldSpec {
    FieldSpec::new(remote, column, FieldKind::Reference(parent))
}

/// Static description of one synced entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    /// Remote object name; also the watermark key.
    pub remote_object: &'static str,
    pub table: &'static str,
    /// Sync order; every referenced parent has a strictly lower rank.
    pub rank: u8,
    pub fields: &'static [FieldSpec],
}

impl EntityDescriptor {
    pub fn remote_fields(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.remote).collect()
    }

    /// Column layout for the upsert, in field order.
    pub fn columns(&self) -> Vec<ColumnSpec> {
        self.fields
            .iter()
            .map(|f| ColumnSpec {
                name: f.column,
                mutable: f.mutable,
            })
            .collect()
    }

    /// `(slot, parent)` for every reference field.
    pub fn references(&self) -> impl Iterator<Item = (usize, EntityKind)> + '_ {
        self.fields
            .iter()
            .enumerate()
            .filter_map(|(slot, f)| match f.kind {
                FieldKind::Reference(parent) => Some((slot, parent)),
                _ => None,
            })
    }

    /// Distinct parents, in field order.
    pub fn parents(&self) -> Vec<EntityKind> {
        let mut parents = Vec::new();
        for (_, parent) in self.references() {
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
        parents
    }

    pub fn has_references(&self) -> bool {
        self.references().next().is_some()
    }
}

pub static CLIENTS: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Client,
    remote_object: "Account",
    table: "clients",
    rank: 0,
    fields: &[
        text("Name", "name"),
        text("FirstName", "first_name"),
        text("LastName", "last_name"),
        text("Salutation", "salutation"),
        text("PersonEmail", "person_email"),
        text("Phone", "phone"),
        text("PersonMobilePhone", "person_mobile_phone"),
        text("Fax", "fax"),
        text("Website", "website"),
        flag("IsPersonAccount", "is_person_account"),
        text("Account_type__c", "account_type"),
        text("AccountSource", "account_source"),
        text("BillingStreet", "billing_street"),
        text("BillingCity", "billing_city"),
        text("BillingPostalCode", "billing_postal_code"),
        text("BillingState", "billing_state"),
        text("BillingCountry", "billing_country"),
        decimal("BillingLatitude", "billing_latitude"),
        decimal("BillingLongitude", "billing_longitude"),
        text("PersonMailingStreet", "person_mailing_street"),
        text("PersonMailingCity", "person_mailing_city"),
        text("PersonMailingPostalCode", "person_mailing_postal_code"),
        text("PersonMailingCountry", "person_mailing_country"),
        date("PersonBirthdate", "person_birthdate"),
        text("Industry", "industry"),
        integer("NumberOfEmployees", "number_of_employees"),
        text("Description", "description"),
        text("Bankverbindung_IBAN__c", "bank_iban"),
        decimal("Account_Balance__c", "account_balance"),
        flag("IsCustomerPortal", "is_customer_portal"),
        text("OwnerId", "owner_id"),
        text("CreatedById", "created_by_id").immutable(),
        timestamp("CreatedDate", "created_date").immutable(),
        timestamp("LastModifiedDate", "last_modified_date"),
        timestamp("SystemModstamp", "system_modstamp"),
        flag("IsDeleted", "is_deleted"),
        flag("IsPriorityRecord", "is_priority_record"),
    ],
};

pub static PROPERTIES: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Property,
    remote_object: "Objekt__c",
    table: "properties",
    rank: 0,
    fields: &[
        text("Name", "name"),
        text("Objekt_ID__c", "objekt_id"),
        text("Name_system__c", "name_system"),
        text("Address__Street__s", "address_street"),
        text("Address__City__s", "address_city"),
        text("Address__PostalCode__s", "address_postal_code"),
        text("Address__StateCode__s", "address_state"),
        text("Address__CountryCode__s", "address_country"),
        decimal("Address__Latitude__s", "address_latitude"),
        decimal("Address__Longitude__s", "address_longitude"),
        decimal("Anzahl_WE__c", "anzahl_we"),
        decimal("Anzahl_Gew__c", "anzahl_gew"),
        decimal("Anzahl_Stellplaz__c", "anzahl_stellplatz"),
        text("Type_WEG_MV__c", "type_weg_mv"),
        text("Verwaltungsstatus__c", "verwaltungsstatus"),
        text("Management_level__c", "management_level"),
        text("City_group__c", "city_group"),
        text("Priority__c", "priority"),
        text("Property_manager__c", "property_manager"),
        text("Objektbuchhalter__c", "objektbuchhalter"),
        text("Objekt_emailaddress__c", "objekt_emailaddress"),
        flag("In_management_this_year__c", "in_management_this_year"),
        flag("In_management_next_year__c", "in_management_next_year"),
        date("Letzte_Abrechnung__c", "letzte_abrechnung"),
        date("Verwaltervertragsende__c", "verwaltervertragsende"),
        flag("Checked_and_confirmed__c", "checked_and_confirmed"),
        text("Impower__c", "impower_id"),
        text("OwnerId", "owner_id"),
        text("CreatedById", "created_by_id").immutable(),
        timestamp("CreatedDate", "created_date").immutable(),
        timestamp("LastModifiedDate", "last_modified_date"),
        timestamp("SystemModstamp", "system_modstamp"),
        flag("IsDeleted", "is_deleted"),
    ],
};

pub static UNITS: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::Unit,
    remote_object: "Hausunit__c",
    table: "units",
    rank: 1,
    fields: &[
        text("Name", "name"),
        text("Description__c", "description"),
        reference("Objekt__c", "property_id", EntityKind::Property),
        text("Objekt_text__c", "objekt_text"),
        text("Type_of_unit__c", "type_of_unit"),
        text("Bauart__c", "bauart"),
        decimal("Wohnflache__c", "wohnflache"),
        decimal("Heizflache__c", "heizflache"),
        integer("Count_active_SEV_contracts__c", "count_active_sev_contracts"),
        integer("Count_vertrage__c", "count_vertrage"),
        date("Last_vertrag_start_date__c", "last_vertrag_start_date"),
        date("Last_vertrage_end_date__c", "last_vertrage_end_date"),
        text("Owner_note__c", "owner_note"),
        text("AccountingID__c", "accounting_id"),
        text("Impower_Unit_ID__c", "impower_unit_id"),
        text("CreatedById", "created_by_id").immutable(),
        timestamp("CreatedDate", "created_date").immutable(),
        timestamp("LastModifiedDate", "last_modified_date"),
        timestamp("SystemModstamp", "system_modstamp"),
        flag("IsDeleted", "is_deleted"),
    ],
};

pub static UNIT_OWNERS: EntityDescriptor = EntityDescriptor {
    kind: EntityKind::UnitOwner,
    remote_object: "Beziehung_zur_Einheit__c",
    table: "unit_owners",
    rank: 2,
    fields: &[
        text("Name", "name"),
        reference("Owner__c", "client_id", EntityKind::Client),
        reference("Unit__c", "unit_id", EntityKind::Unit),
        text("Parent_Objekt__c", "parent_objekt_sf_id"),
        text("Objekt_name__c", "objekt_name"),
        text("Haus_unit_description__c", "haus_unit_description"),
        date("Start_date__c", "start_date"),
        date("End_date__c", "end_date"),
        flag("Active__c", "active"),
        text("OwnerId", "sf_owner_id"),
        text("CreatedById", "created_by_id").immutable(),
        timestamp("CreatedDate", "created_date").immutable(),
        timestamp("LastModifiedDate", "last_modified_date"),
        timestamp("SystemModstamp", "system_modstamp"),
        flag("IsDeleted", "is_deleted"),
    ],
};

/// Every synced entity type, parents first.
pub fn catalog() -> Vec<&'static EntityDescriptor> {
    vec![&CLIENTS, &PROPERTIES, &UNITS, &UNIT_OWNERS]
}
