use chrono::NaiveDate;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::entities::listing_item::PricingModel;
use crate::errors::ServiceError;

/// Rates and add-ons applied on top of a base amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingOptions {
    pub tax_rate: Decimal,
    pub platform_fee_rate: Decimal,
    pub service_call_fee_cents: i64,
    pub discount_cents: i64,
}

impl Default for PricingOptions {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.13),
            platform_fee_rate: dec!(0.05),
            service_call_fee_cents: 0,
            discount_cents: 0,
        }
    }
}

/// Integer-cent price breakdown. `total_cents` never includes the deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub base_amount_cents: i64,
    pub discount_cents: i64,
    pub platform_fee_cents: i64,
    pub tax_cents: i64,
    pub service_call_fee_cents: i64,
    pub deposit_cents: Option<i64>,
    pub total_cents: i64,
    pub currency: String,
}

impl PriceBreakdown {
    pub fn with_deposit(mut self, deposit_cents: Option<i64>) -> Self {
        self.deposit_cents = deposit_cents.filter(|d| *d > 0);
        self
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.to_ascii_uppercase();
        self
    }

    /// Amount charged at checkout: the total plus any deposit leg.
    pub fn amount_due_cents(&self) -> i64 {
        self.total_cents + self.deposit_cents.unwrap_or(0)
    }

    pub fn display(&self) -> BreakdownDisplay {
        let fmt = |cents: i64| format_cents(cents, &self.currency);
        BreakdownDisplay {
            base_amount: fmt(self.base_amount_cents),
            discount: fmt(self.discount_cents),
            platform_fee: fmt(self.platform_fee_cents),
            tax: fmt(self.tax_cents),
            service_call_fee: fmt(self.service_call_fee_cents),
            deposit: self.deposit_cents.map(fmt),
            total: fmt(self.total_cents),
        }
    }
}

/// Presentation strings derived from a breakdown. Never parsed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownDisplay {
    pub base_amount: String,
    pub discount: String,
    pub platform_fee: String,
    pub tax: String,
    pub service_call_fee: String,
    pub deposit: Option<String>,
    pub total: String,
}

fn round_cents(value: Decimal) -> Result<i64, ServiceError> {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError("amount out of range".to_string()))
}

/// Computes the breakdown for `base_cents`, rounding each step half-up to the
/// cent before the next one uses it.
pub fn compute_breakdown(
    base_cents: i64,
    options: &PricingOptions,
) -> Result<PriceBreakdown, ServiceError> {
    if base_cents < 0 {
        return Err(ServiceError::ValidationError(
            "base amount must not be negative".to_string(),
        ));
    }
    if options.discount_cents < 0 || options.service_call_fee_cents < 0 {
        return Err(ServiceError::ValidationError(
            "discount and service call fee must not be negative".to_string(),
        ));
    }

    let discount = options.discount_cents.min(base_cents);
    let discounted_base = base_cents - discount;
    let platform_fee = round_cents(Decimal::from(discounted_base) * options.platform_fee_rate)?;
    let tax = round_cents(Decimal::from(discounted_base + platform_fee) * options.tax_rate)?;
    let total = discounted_base + platform_fee + tax + options.service_call_fee_cents;

    Ok(PriceBreakdown {
        base_amount_cents: base_cents,
        discount_cents: discount,
        platform_fee_cents: platform_fee,
        tax_cents: tax,
        service_call_fee_cents: options.service_call_fee_cents,
        deposit_cents: None,
        total_cents: total,
        currency: String::from("CAD"),
    })
}

/// Renders cents for display, e.g. `$59.33`.
pub fn format_cents(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let amount = format!("{}.{:02}", abs / 100, abs % 100);
    match currency.to_ascii_uppercase().as_str() {
        "CAD" | "USD" => format!("{sign}${amount}"),
        other => format!("{sign}{amount} {other}"),
    }
}

/// The terms a buyer purchases under, one variant per pricing model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PurchaseTerms {
    Fixed { quantity: i32 },
    Hourly { hours: i32 },
    /// No base amount until the provider submits a quote.
    Quote,
    Negotiable { agreed_cents: i64 },
    DepositRequired {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
}

impl PurchaseTerms {
    pub fn pricing_model(&self) -> PricingModel {
        match self {
            PurchaseTerms::Fixed { .. } => PricingModel::Fixed,
            PurchaseTerms::Hourly { .. } => PricingModel::Hourly,
            PurchaseTerms::Quote => PricingModel::Quote,
            PurchaseTerms::Negotiable { .. } => PricingModel::Negotiable,
            PurchaseTerms::DepositRequired { .. } => PricingModel::DepositRequired,
        }
    }

    /// Quantity, hours or rental days.
    pub fn units(&self) -> Result<i32, ServiceError> {
        match self {
            PurchaseTerms::Fixed { quantity } => positive(*quantity, "quantity"),
            PurchaseTerms::Hourly { hours } => positive(*hours, "hours"),
            PurchaseTerms::Quote | PurchaseTerms::Negotiable { .. } => Ok(1),
            PurchaseTerms::DepositRequired {
                start_date,
                end_date,
            } => rental_days(*start_date, *end_date),
        }
    }

    /// Base amount for these terms, `None` while a quote is outstanding.
    pub fn base_amount_cents(&self, unit_price_cents: i64) -> Result<Option<i64>, ServiceError> {
        if unit_price_cents < 0 {
            return Err(ServiceError::ValidationError(
                "unit price must not be negative".to_string(),
            ));
        }
        let base = match self {
            PurchaseTerms::Quote => return Ok(None),
            PurchaseTerms::Negotiable { agreed_cents } => {
                if *agreed_cents < 0 {
                    return Err(ServiceError::ValidationError(
                        "agreed amount must not be negative".to_string(),
                    ));
                }
                *agreed_cents
            }
            _ => unit_price_cents
                .checked_mul(i64::from(self.units()?))
                .ok_or_else(|| ServiceError::ValidationError("amount out of range".to_string()))?,
        };
        Ok(Some(base))
    }

    pub fn rental_window(&self) -> Option<(NaiveDate, NaiveDate)> {
        match self {
            PurchaseTerms::DepositRequired {
                start_date,
                end_date,
            } => Some((*start_date, *end_date)),
            _ => None,
        }
    }
}

fn positive(value: i32, field: &str) -> Result<i32, ServiceError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ServiceError::ValidationError(format!(
            "{field} must be greater than zero"
        )))
    }
}

/// Rental days counted inclusively, so a same-day rental is one day.
pub fn rental_days(start: NaiveDate, end: NaiveDate) -> Result<i32, ServiceError> {
    if end < start {
        return Err(ServiceError::ValidationError(
            "rental end date is before start date".to_string(),
        ));
    }
    let days = (end - start).num_days() + 1;
    i32::try_from(days.max(1))
        .map_err(|_| ServiceError::ValidationError("rental window too long".to_string()))
}

/// Pricing with the platform's configured rates.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    tax_rate: Decimal,
    platform_fee_rate: Decimal,
    currency: String,
}

impl Default for PricingEngine {
    fn default() -> Self {
        let defaults = PricingOptions::default();
        Self {
            tax_rate: defaults.tax_rate,
            platform_fee_rate: defaults.platform_fee_rate,
            currency: "CAD".to_string(),
        }
    }
}

impl PricingEngine {
    pub fn new(tax_rate: Decimal, platform_fee_rate: Decimal, currency: &str) -> Self {
        Self {
            tax_rate,
            platform_fee_rate,
            currency: currency.to_ascii_uppercase(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let rate = |value: f64, name: &str| {
            Decimal::from_f64(value)
                .map(|d| d.round_dp(6))
                .ok_or_else(|| ServiceError::InternalError(format!("invalid {name}: {value}")))
        };
        Ok(Self::new(
            rate(config.tax_rate, "tax_rate")?,
            rate(config.platform_fee_rate, "platform_fee_rate")?,
            &config.default_currency,
        ))
    }

    pub fn default_currency(&self) -> &str {
        &self.currency
    }

    pub fn options(&self, service_call_fee_cents: i64, discount_cents: i64) -> PricingOptions {
        PricingOptions {
            tax_rate: self.tax_rate,
            platform_fee_rate: self.platform_fee_rate,
            service_call_fee_cents,
            discount_cents,
        }
    }

    /// Breakdown in `currency`, or the platform default when none is given.
    pub fn quote(
        &self,
        base_cents: i64,
        service_call_fee_cents: i64,
        discount_cents: i64,
        deposit_cents: Option<i64>,
        currency: Option<&str>,
    ) -> Result<PriceBreakdown, ServiceError> {
        let breakdown = compute_breakdown(
            base_cents,
            &self.options(service_call_fee_cents, discount_cents),
        )?;
        Ok(breakdown
            .with_deposit(deposit_cents)
            .with_currency(currency.unwrap_or(&self.currency)))
    }
}
