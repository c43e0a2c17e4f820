use chrono::{Duration, Utc};
use dispatch_crm::db::Database;
use dispatch_crm::models::*;
use dispatch_crm::Error;
use rust_decimal_macros::dec;
use speculate2::speculate;
use uuid::Uuid;

fn create_city(db: &Database, name: &str) -> NamedEntry {
    db.create_named(
        ReferenceKind::City,
        NamedEntryInput {
            name: name.to_string(),
        },
    )
    .expect("Failed to create city")
}

fn create_master(db: &Database, city_id: Uuid, login: &str) -> Master {
    db.create_master(CreateMasterInput {
        city_id,
        name: "Ivan Petrov".to_string(),
        birth_date: None,
        passport: None,
        phone: "+7 916 000-11-22".to_string(),
        is_active: true,
        chat_id: None,
        note: None,
        login: login.to_string(),
        password: "secret123".to_string(),
    })
    .expect("Failed to create master")
}

fn request_input(city_id: Uuid) -> CreateRequestInput {
    CreateRequestInput {
        city_id,
        ad_channel_id: None,
        request_type_id: None,
        client_phone: "8 (916) 123-45-67".to_string(),
        atc_phone: None,
        client_name: "Anna".to_string(),
        address: "Lenina 1".to_string(),
        meeting_date: Utc::now(),
        appliance_type: "Washing machine".to_string(),
        problem: "Does not drain".to_string(),
        status: None,
        master_id: None,
        total: None,
        expense: None,
        master_comment: None,
        call_centre_name: "Olga".to_string(),
        call_centre_comment: None,
    }
}

/// Create a request with money and a technician, then close it.
fn close_request(
    db: &Database,
    city_id: Uuid,
    master_id: Uuid,
    total: rust_decimal::Decimal,
    expense: rust_decimal::Decimal,
    status: RequestStatus,
) -> ServiceRequest {
    let mut input = request_input(city_id);
    input.master_id = Some(master_id);
    input.total = Some(total);
    input.expense = Some(expense);
    let request = db.create_request(input).expect("Failed to create request");

    db.update_request(request.id, UpdateRequestInput {
        status: Some(status),
        ..Default::default()
    })
    .expect("Failed to close request")
    .expect("Request missing")
}

fn payouts_for(db: &Database, request_id: Uuid) -> Vec<Payout> {
    db.list_payouts(&PayoutFilter {
        request_id: Some(request_id),
        ..Default::default()
    })
    .expect("Failed to list payouts")
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
        let city = create_city(&db, "Saratov");
    }

    describe "reference data" {
        it "rejects duplicate city names" {
            let result = db.create_named(ReferenceKind::City, NamedEntryInput {
                name: "Saratov".to_string(),
            });
            assert!(result.is_err());
        }

        it "get_or_create_city reuses an existing city" {
            let again = db.get_or_create_city("Saratov").expect("Failed");
            assert_eq!(again.id, city.id);
        }

        it "routes a line to its city through city phones and ad channels" {
            db.create_city_phone(CityPhoneInput {
                city_id: city.id,
                phone: "8 800 555-35-35".to_string(),
            }).expect("Failed to create city phone");
            let channel = db.create_ad_channel(CreateAdChannelInput {
                name: "Avito".to_string(),
                city_id: city.id,
                phone: "+7 845 200-00-00".to_string(),
            }).expect("Failed to create ad channel");

            assert_eq!(db.find_city_by_line("78005553535").expect("Query failed"), Some(city.id));
            assert_eq!(db.find_city_by_line("78452000000").expect("Query failed"), Some(city.id));
            assert_eq!(db.find_ad_channel_by_phone("78452000000").expect("Query failed"), Some(channel.id));
            assert_eq!(db.find_city_by_line("70000000000").expect("Query failed"), None);
        }
    }

    describe "people" {
        it "stores users with a hashed password" {
            let user = db.create_user(CreateUserInput {
                city_id: city.id,
                name: "Olga".to_string(),
                role: Role::CallCentre,
                login: "olga".to_string(),
                password: "secret123".to_string(),
                is_active: true,
                note: None,
            }).expect("Failed to create user");

            let creds = db.get_user_credentials("olga").expect("Query failed").expect("Missing");
            assert_eq!(creds.id, user.id);
            assert_ne!(creds.password_hash, "secret123");
            assert!(dispatch_crm::auth::verify_password("secret123", &creds.password_hash));
        }

        it "refuses the master role for back-office users" {
            let result = db.create_user(CreateUserInput {
                city_id: city.id,
                name: "Nope".to_string(),
                role: Role::Master,
                login: "nope".to_string(),
                password: "secret123".to_string(),
                is_active: true,
                note: None,
            });
            assert!(matches!(result, Err(Error::Validation(_))));
        }

        it "normalises the master phone" {
            let master = create_master(&db, city.id, "ivan");
            assert_eq!(master.phone, "79160001122");
        }

        it "filters masters by activity" {
            let active = create_master(&db, city.id, "ivan");
            let inactive = create_master(&db, city.id, "petr");
            db.update_master(inactive.id, UpdateMasterInput {
                is_active: Some(false),
                ..Default::default()
            }).expect("Failed to update");

            let found = db.list_masters(&MasterFilter {
                city_id: Some(city.id),
                is_active: Some(true),
            }).expect("Query failed");
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, active.id);
        }
    }

    describe "requests" {
        it "normalises the client phone and defaults to waiting" {
            let request = db.create_request(request_input(city.id)).expect("Failed to create");
            assert_eq!(request.client_phone, "79161234567");
            assert_eq!(request.status, RequestStatus::Waiting);
            assert!(request.net.is_none());
            assert!(request.technician_share.is_none());
        }

        it "rejects an unknown city" {
            let result = db.create_request(request_input(Uuid::new_v4()));
            assert!(result.is_err());
        }

        it "rejects an unknown master" {
            let mut input = request_input(city.id);
            input.master_id = Some(Uuid::new_v4());
            assert!(db.create_request(input).is_err());
        }

        it "rejects negative money" {
            let mut input = request_input(city.id);
            input.total = Some(dec!(-1));
            assert!(matches!(db.create_request(input), Err(Error::Validation(_))));
        }

        it "keeps absent fields on update and clears explicit nulls" {
            let master = create_master(&db, city.id, "ivan");
            let mut input = request_input(city.id);
            input.master_id = Some(master.id);
            let request = db.create_request(input).expect("Failed to create");

            let kept = db.update_request(request.id, UpdateRequestInput {
                problem: Some("Leaks".to_string()),
                ..Default::default()
            }).expect("Failed").expect("Missing");
            assert_eq!(kept.master_id, Some(master.id));
            assert_eq!(kept.problem, "Leaks");

            let cleared = db.update_request(request.id, UpdateRequestInput {
                master_id: Some(None),
                ..Default::default()
            }).expect("Failed").expect("Missing");
            assert!(cleared.master_id.is_none());
        }

        it "returns None when updating a missing request" {
            let result = db.update_request(Uuid::new_v4(), UpdateRequestInput::default())
                .expect("Query failed");
            assert!(result.is_none());
        }

        it "searches by client name, phone and address" {
            db.create_request(request_input(city.id)).expect("Failed");
            let mut other = request_input(city.id);
            other.client_name = "Boris".to_string();
            other.client_phone = "79990001122".to_string();
            other.address = "Mira 5".to_string();
            db.create_request(other).expect("Failed");

            let by_name = db.list_requests(&RequestFilter {
                q: Some("Bor".to_string()),
                ..Default::default()
            }).expect("Query failed");
            assert_eq!(by_name.len(), 1);

            let by_phone = db.list_requests(&RequestFilter {
                q: Some("916123".to_string()),
                ..Default::default()
            }).expect("Query failed");
            assert_eq!(by_phone.len(), 1);
            assert_eq!(by_phone[0].client_name, "Anna");
        }

        it "finds a recent open request for the same caller" {
            let request = db.create_request(request_input(city.id)).expect("Failed");
            let since = Utc::now() - Duration::minutes(30);

            let found = db.find_recent_open_request(city.id, "79161234567", since)
                .expect("Query failed");
            assert_eq!(found.map(|r| r.id), Some(request.id));

            db.update_request(request.id, UpdateRequestInput {
                status: Some(RequestStatus::Accepted),
                ..Default::default()
            }).expect("Failed");
            let found = db.find_recent_open_request(city.id, "79161234567", since)
                .expect("Query failed");
            assert!(found.is_none());
        }
    }

    describe "settlement" {
        it "creates one pending payout for a done request with a technician" {
            let master = create_master(&db, city.id, "ivan");
            let request = db.create_request(request_input(city.id)).expect("Failed");

            let done = db.update_request(request.id, UpdateRequestInput {
                total: Some(Some(dec!(1000.00))),
                expense: Some(Some(dec!(200.00))),
                master_id: Some(Some(master.id)),
                status: Some(RequestStatus::Done),
                ..Default::default()
            }).expect("Failed").expect("Missing");

            assert_eq!(done.net, Some(dec!(800.00)));
            assert_eq!(done.technician_share, Some(dec!(800.00)));

            let payouts = payouts_for(&db, request.id);
            assert_eq!(payouts.len(), 1);
            assert_eq!(payouts[0].amount, dec!(800.00));
            assert_eq!(payouts[0].status, PayoutStatus::Pending);
        }

        it "creating a request already done creates no payout" {
            let master = create_master(&db, city.id, "ivan");
            let mut input = request_input(city.id);
            input.master_id = Some(master.id);
            input.total = Some(dec!(1000.00));
            input.expense = Some(dec!(200.00));
            input.status = Some(RequestStatus::Done);

            let request = db.create_request(input).expect("Failed");
            assert_eq!(request.technician_share, Some(dec!(800.00)));
            assert!(db.get_payout_by_request(request.id).expect("Query failed").is_none());
        }

        it "creates the payout on the first save after a request entered as done" {
            let master = create_master(&db, city.id, "ivan");
            let mut input = request_input(city.id);
            input.master_id = Some(master.id);
            input.total = Some(dec!(1000.00));
            input.expense = Some(dec!(200.00));
            input.status = Some(RequestStatus::Done);
            let request = db.create_request(input).expect("Failed");

            db.update_request(request.id, UpdateRequestInput {
                master_comment: Some("Checked".to_string()),
                ..Default::default()
            }).expect("Failed");

            let payouts = payouts_for(&db, request.id);
            assert_eq!(payouts.len(), 1);
            assert_eq!(payouts[0].amount, dec!(800.00));
        }

        it "creates no payout without a technician" {
            let request = db.create_request(request_input(city.id)).expect("Failed");

            let done = db.update_request(request.id, UpdateRequestInput {
                total: Some(Some(dec!(1000.00))),
                expense: Some(Some(dec!(200.00))),
                status: Some(RequestStatus::Done),
                ..Default::default()
            }).expect("Failed").expect("Missing");

            assert_eq!(done.net, Some(dec!(800.00)));
            assert_eq!(done.technician_share, Some(dec!(800.00)));
            assert!(payouts_for(&db, request.id).is_empty());
        }

        it "leaves the share unset and creates no payout when expense exceeds total" {
            let master = create_master(&db, city.id, "ivan");
            let mut input = request_input(city.id);
            input.master_id = Some(master.id);
            input.total = Some(dec!(100.00));
            input.expense = Some(dec!(200.00));
            input.status = Some(RequestStatus::Done);

            let request = db.create_request(input).expect("Failed");
            assert_eq!(request.net, Some(dec!(-100.00)));
            assert!(request.technician_share.is_none());
            assert!(payouts_for(&db, request.id).is_empty());
        }

        it "does not duplicate the payout when a settled request is saved again" {
            let master = create_master(&db, city.id, "ivan");
            let request = close_request(&db, city.id, master.id, dec!(1000.00), dec!(200.00), RequestStatus::Done);
            let first = payouts_for(&db, request.id);
            assert_eq!(first.len(), 1);

            db.update_request(request.id, UpdateRequestInput {
                status: Some(RequestStatus::Done),
                master_comment: Some("Replaced pump".to_string()),
                ..Default::default()
            }).expect("Failed");

            let after = payouts_for(&db, request.id);
            assert_eq!(after.len(), 1);
            assert_eq!(after[0].id, first[0].id);
            assert_eq!(after[0].amount, dec!(800.00));
        }

        it "updates the payout amount when the share changes" {
            let master = create_master(&db, city.id, "ivan");
            let request = close_request(&db, city.id, master.id, dec!(1000.00), dec!(200.00), RequestStatus::Modern);
            assert_eq!(payouts_for(&db, request.id)[0].amount, dec!(800.00));

            db.update_request(request.id, UpdateRequestInput {
                expense: Some(Some(dec!(300.00))),
                ..Default::default()
            }).expect("Failed");

            let payouts = payouts_for(&db, request.id);
            assert_eq!(payouts.len(), 1);
            assert_eq!(payouts[0].amount, dec!(700.00));
        }

        it "keeps the payout when the request is reopened" {
            let master = create_master(&db, city.id, "ivan");
            let request = close_request(&db, city.id, master.id, dec!(500), dec!(0), RequestStatus::Done);

            db.update_request(request.id, UpdateRequestInput {
                status: Some(RequestStatus::InProgress),
                ..Default::default()
            }).expect("Failed");

            let payouts = payouts_for(&db, request.id);
            assert_eq!(payouts.len(), 1);
            assert_eq!(payouts[0].amount, dec!(500));
        }

        it "clears net and share when the total is removed" {
            let mut input = request_input(city.id);
            input.total = Some(dec!(1000));
            input.expense = Some(dec!(100));
            let request = db.create_request(input).expect("Failed");

            let updated = db.update_request(request.id, UpdateRequestInput {
                total: Some(None),
                ..Default::default()
            }).expect("Failed").expect("Missing");
            assert!(updated.net.is_none());
            assert!(updated.technician_share.is_none());
        }
    }

    describe "payouts" {
        it "moves through review states without touching the amount" {
            let master = create_master(&db, city.id, "ivan");
            let request = close_request(&db, city.id, master.id, dec!(1000), dec!(250), RequestStatus::Done);
            let payout = db.get_payout_by_request(request.id).expect("Query failed").expect("Missing");

            let checked = db.update_payout(payout.id, UpdatePayoutInput {
                status: Some(PayoutStatus::Checking),
                comment: Some("Transferred".to_string()),
                ..Default::default()
            }).expect("Failed").expect("Missing");
            assert_eq!(checked.status, PayoutStatus::Checking);
            assert_eq!(checked.amount, dec!(750));
        }

        it "keeps the receipt path across later reviews" {
            let master = create_master(&db, city.id, "ivan");
            let request = close_request(&db, city.id, master.id, dec!(1000), dec!(250), RequestStatus::Done);
            let payout = db.get_payout_by_request(request.id).expect("Query failed").expect("Missing");

            db.update_payout(payout.id, UpdatePayoutInput {
                status: Some(PayoutStatus::Checking),
                receipt_path: Some("payouts/receipt.jpg".to_string()),
                ..Default::default()
            }).expect("Failed");
            let confirmed = db.update_payout(payout.id, UpdatePayoutInput {
                status: Some(PayoutStatus::Confirmed),
                ..Default::default()
            }).expect("Failed").expect("Missing");

            assert_eq!(confirmed.receipt_path.as_deref(), Some("payouts/receipt.jpg"));
            let stored = db.get_payout(payout.id).expect("Query failed").expect("Missing");
            assert_eq!(stored.receipt_path.as_deref(), Some("payouts/receipt.jpg"));
            assert_eq!(stored.status, PayoutStatus::Confirmed);
        }

        it "filters payouts by master" {
            let ivan = create_master(&db, city.id, "ivan");
            let petr = create_master(&db, city.id, "petr");
            for master in [&ivan, &petr] {
                close_request(&db, city.id, master.id, dec!(1000), dec!(0), RequestStatus::Done);
            }

            let own = db.list_payouts(&PayoutFilter {
                master_id: Some(ivan.id),
                ..Default::default()
            }).expect("Query failed");
            assert_eq!(own.len(), 1);
        }
    }

    describe "transactions" {
        it "summarises amounts per type over a date range" {
            let rent = db.create_named(ReferenceKind::TransactionType, NamedEntryInput {
                name: "Rent".to_string(),
            }).expect("Failed");
            let ads = db.create_named(ReferenceKind::TransactionType, NamedEntryInput {
                name: "Advertising".to_string(),
            }).expect("Failed");
            let day = chrono::NaiveDate::from_ymd_opt(2024, 3, 10).expect("valid date");

            for (type_id, amount) in [(rent.id, dec!(100)), (rent.id, dec!(50.50)), (ads.id, dec!(30))] {
                db.create_transaction(CreateTransactionInput {
                    city_id: city.id,
                    transaction_type_id: type_id,
                    amount,
                    note: None,
                    date: Some(day),
                }).expect("Failed");
            }
            db.create_transaction(CreateTransactionInput {
                city_id: city.id,
                transaction_type_id: rent.id,
                amount: dec!(999),
                note: None,
                date: Some(day + Duration::days(40)),
            }).expect("Failed");

            let summary = db.summarize_transactions(&TransactionFilter {
                city_id: Some(city.id),
                start_date: Some(day),
                end_date: Some(day + Duration::days(1)),
                ..Default::default()
            }).expect("Query failed");

            assert_eq!(summary, vec![
                TransactionSummary {
                    transaction_type: "Advertising".to_string(),
                    count: 1,
                    total: dec!(30),
                },
                TransactionSummary {
                    transaction_type: "Rent".to_string(),
                    count: 2,
                    total: dec!(150.50),
                },
            ]);
        }
    }
}
